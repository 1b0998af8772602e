//! Pure image-sync decisions
//!
//! Nothing in this module talks to the API server. The controller feeds it
//! objects it has read and acts on what it returns.

pub mod images;
pub mod matcher;
pub mod ownership;

pub use images::{sync_containers, sync_cronjob, DesiredImages, ImageChange};
pub use matcher::{find_managed, is_managed_by, MatchRules};
pub use ownership::{is_owned_by, owned_jobs, OwnerIdentity};
