//! Network envelopes and the codec that produces them
//!
//! | Message           | Kind  | Tags                                        |
//! |-------------------|-------|---------------------------------------------|
//! | Public note       | 1     | `d`, `title`, `t`*, `param`*, `published_at`|
//! | Direct message    | 4     | `p`                                         |
//! | Self-sync note    | 4     | `p` (self), `d=notesync-note:<id>`          |
//! | Ontology          | 30001 | `d=notesync-ontology`                       |
//! | Tombstone         | 5     | `e`*, `reason`                              |

mod codec;
mod envelope;
mod filter;

pub use codec::{
    note_d_tag, note_id_from_d_tag, DecodedEvent, Deletion, EventCodec, SelfNote, NOTE_NAMESPACE,
    ONTOLOGY_D_TAG, TOMBSTONE_REASON,
};
pub(crate) use codec::{from_unix_seconds, unix_seconds};
pub use envelope::{is_parameterized_replaceable, tag, Envelope, EventKind};
pub use filter::Filter;
