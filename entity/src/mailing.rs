use sea_orm::entity::prelude::*;

use super::mailing_status::MailingStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "mailing")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub start_time: DateTimeUtc,
    pub end_time: DateTimeUtc,
    pub status: MailingStatus,
    pub created_at: DateTimeUtc,
    pub last_attempt: Option<DateTimeUtc>,
    pub message_id: i32,
    pub owner_id: i32,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::message::Entity",
        from = "Column::MessageId",
        to = "super::message::Column::Id"
    )]
    Message,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,
    #[sea_orm(has_many = "super::mailing_attempt::Entity")]
    MailingAttempt,
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::mailing_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MailingAttempt.def()
    }
}

impl Related<super::recipient::Entity> for Entity {
    fn to() -> RelationDef {
        super::mailing_recipient::Relation::Recipient.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::mailing_recipient::Relation::Mailing.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
