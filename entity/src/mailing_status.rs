use sea_orm::{DeriveActiveEnum, EnumIter};

#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(Some(20))")]
pub enum MailingStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "partially_completed")]
    PartiallyCompleted,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl MailingStatus {
    /// Statuses from which a dispatch run may start.
    pub const DISPATCHABLE: [MailingStatus; 2] =
        [MailingStatus::Created, MailingStatus::PartiallyCompleted];

    pub fn is_dispatchable(self) -> bool {
        Self::DISPATCHABLE.contains(&self)
    }
}
