pub mod args;
pub mod completions;
pub mod freetier;
pub mod identity_center;
pub mod multi_acc_iam;
pub mod organizations;

pub use args::{ManagementArgs, SessionArgs};
pub use completions::CompletionsCommand;
pub use freetier::FreetierCommand;
pub use identity_center::IdentityCenterCommand;
pub use multi_acc_iam::MultiAccIamCommand;
pub use organizations::OrganizationsCommand;
