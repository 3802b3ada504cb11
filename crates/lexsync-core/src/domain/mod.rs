//! Domain model (entities, versioned records, change events, tickets, drafts).
//!
//! ドメイン層は I/O を持ちません。ports/app から参照されるだけです。

pub mod draft;
pub mod entity;
pub mod errors;
pub mod events;
pub mod record;
pub mod ticket;

pub use self::draft::{Draft, DraftKey};
pub use self::entity::{ChangeType, EntityType};
pub use self::errors::{
    ConflictError, ErrorKind, LoadError, TerminalLoadError, TransportError, WriteError,
};
pub use self::events::{ChangeEvent, DataChangeMessage, InboundMessage};
pub use self::record::{Version, VersionedRecord};
pub use self::ticket::{LoadTicket, TicketId};
