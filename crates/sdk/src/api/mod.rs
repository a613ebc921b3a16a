//! Typed endpoint groups of the directory API.

pub mod discovery;
pub mod documents;
pub mod knowledge;
pub mod notifications;
pub mod servers;

pub use discovery::DiscoveryApi;
pub use documents::{Document, DocumentUpdate, DocumentsApi, NewDocument};
pub use knowledge::{KnowledgeApi, KnowledgeQuery, KnowledgeResult};
pub use notifications::{NewNotification, Notification, NotificationUpdate, NotificationsApi};
pub use servers::ServersApi;
