pub mod email;
pub mod expense;
pub mod label;
pub mod sync_state;

pub mod prelude {
    pub use super::email::Entity as Email;
    pub use super::expense::Entity as Expense;
    pub use super::label::Entity as Label;
    pub use super::sync_state::Entity as SyncState;
}
