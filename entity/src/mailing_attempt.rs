use sea_orm::entity::prelude::*;

use super::attempt_status::AttemptStatus;

/// One send outcome for one recipient. Rows are only ever inserted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "mailing_attempt")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub mailing_id: i32,
    /// Nulled when the recipient is deleted.
    pub recipient_id: Option<i32>,
    pub attempt_time: DateTimeUtc,
    pub status: AttemptStatus,
    #[sea_orm(column_type = "Text")]
    pub server_response: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::mailing::Entity",
        from = "Column::MailingId",
        to = "super::mailing::Column::Id"
    )]
    Mailing,
    #[sea_orm(
        belongs_to = "super::recipient::Entity",
        from = "Column::RecipientId",
        to = "super::recipient::Column::Id"
    )]
    Recipient,
}

impl Related<super::mailing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mailing.def()
    }
}

impl Related<super::recipient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipient.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
