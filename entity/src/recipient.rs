use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "recipient")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub email: String,
    pub full_name: String,
    pub comment: Option<String>,
    pub owner_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,
    #[sea_orm(has_many = "super::mailing_attempt::Entity")]
    MailingAttempt,
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

impl Related<super::mailing::Entity> for Entity {
    fn to() -> RelationDef {
        super::mailing_recipient::Relation::Mailing.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::mailing_recipient::Relation::Recipient.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
