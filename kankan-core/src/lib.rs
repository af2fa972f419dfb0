//! Board model for Kankan.
//!
//! Each board is a replicated document ([`BoardDocument`]) that converges
//! across peers without a central authority. This crate holds the document
//! model, its read-only [`BoardProjection`], the device-local
//! [`BoardDirectory`] and invite link helpers. Networking and storage live in
//! `kankan-collab`.

pub mod directory;
pub mod document;
pub mod error;
pub mod invite;
pub mod projection;
pub mod replica;

pub use directory::{placeholder_name, BoardDirectory, BoardEntry};
pub use document::{
    document_guid, now_millis, BoardDocument, CardDetail, CardDraft, CardEdit, ObserverId,
    UpdateObserver, DEFAULT_COLUMNS,
};
pub use error::DocumentError;
pub use invite::{build_join_url, consume_join_param, JoinRequest};
pub use projection::{age_label, BoardProjection, BoardSummary, CardView, ColumnView};
pub use replica::{is_empty_update, NetworkTag, Origin, Replica, EMPTY_UPDATE};
