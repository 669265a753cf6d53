pub mod accounts;
pub mod channels;
pub mod tokens;
pub mod user_request_costs;

pub use accounts::Entity as Accounts;
pub use channels::Entity as Channels;
pub use tokens::Entity as Tokens;
pub use user_request_costs::Entity as UserRequestCosts;
