//! Domain entities to and from signed envelopes
//!
//! Self-sync notes and direct messages are encrypted (see [`crate::crypto`]);
//! public notes and the ontology travel in the clear.

use chrono::{DateTime, Utc};

use super::envelope::{tag, Envelope, EventKind};
use crate::config::PrivacySettings;
use crate::crypto::{decrypt_payload, encrypt_payload};
use crate::error::{SyncError, SyncResult};
use crate::identity::{parse_public_key, Keypair};
use crate::types::{DirectMessage, Note, Ontology, PublicNote};

/// Prefix of the `d` tag on self-sync note envelopes (`notesync-note:<id>`)
pub const NOTE_NAMESPACE: &str = "notesync-note";

/// The `d` tag of the single ontology envelope
pub const ONTOLOGY_D_TAG: &str = "notesync-ontology";

/// Reason attached to tombstones issued by the sync cycle
pub const TOMBSTONE_REASON: &str = "Note deleted";

/// `d` tag for a self-sync note
pub fn note_d_tag(note_id: &str) -> String {
    format!("{}:{}", NOTE_NAMESPACE, note_id)
}

/// Inverse of [`note_d_tag`]
pub fn note_id_from_d_tag(d: &str) -> Option<&str> {
    d.strip_prefix(NOTE_NAMESPACE)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|id| !id.is_empty())
}

pub(crate) fn unix_seconds(at: DateTime<Utc>) -> u64 {
    at.timestamp().max(0) as u64
}

pub(crate) fn from_unix_seconds(secs: u64) -> SyncResult<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| SyncError::Parse(format!("Timestamp out of range: {}", secs)))
}

/// A self-sync note together with the envelope that carried it
#[derive(Debug, Clone, PartialEq)]
pub struct SelfNote {
    pub note: Note,
    pub event_id: String,
    pub created_at: u64,
}

/// A deletion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub event_id: String,
    pub author: String,
    pub targets: Vec<String>,
    pub reason: Option<String>,
}

/// An envelope resolved to what it carries
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    PublicNote(PublicNote),
    DirectMessage(DirectMessage),
    SelfNote(SelfNote),
    Ontology(Ontology),
    Deletion(Deletion),
}

/// Encoder/decoder bound to one identity.
#[derive(Clone)]
pub struct EventCodec {
    keypair: Keypair,
}

impl EventCodec {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Public key of the identity this codec signs for
    pub fn public_key(&self) -> String {
        self.keypair.public_hex()
    }

    /// Kind 1: the note body in the clear. Tags and values are attached only
    /// when the privacy settings allow it.
    pub fn encode_public_note(
        &self,
        note: &Note,
        privacy: &PrivacySettings,
    ) -> SyncResult<Envelope> {
        let now = Utc::now();
        let mut tags = vec![tag(["d", note.id.as_str()]), tag(["title", note.title.as_str()])];
        if privacy.share_tags_publicly {
            tags.extend(note.tags.iter().map(|t| tag(["t", t.as_str()])));
        }
        if privacy.share_values_publicly {
            tags.extend(
                note.values
                    .iter()
                    .map(|(k, v)| tag(["param", k.as_str(), v.as_str()])),
            );
        }
        tags.push(tag(["published_at".to_string(), unix_seconds(now).to_string()]));

        Envelope::sign(
            &self.keypair,
            EventKind::PublicNote,
            unix_seconds(now),
            tags,
            note.content.clone(),
        )
    }

    /// Kind 4 addressed to `recipient_hex`.
    pub fn encode_direct_message(&self, recipient_hex: &str, text: &str) -> SyncResult<Envelope> {
        let recipient = parse_public_key(recipient_hex)?;
        let key = self.keypair.conversation_key(&recipient)?;
        let content = encrypt_payload(&key, text)?;

        Envelope::sign(
            &self.keypair,
            EventKind::EncryptedDirect,
            unix_seconds(Utc::now()),
            vec![tag(["p", recipient_hex])],
            content,
        )
    }

    /// Kind 4 addressed to ourselves, carrying the full note as JSON.
    ///
    /// `created_at` is the note's `updated_at` so relays order copies the
    /// same way the merge does.
    pub fn encode_self_note(&self, note: &Note) -> SyncResult<Envelope> {
        let json = serde_json::to_string(note)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode note: {}", e)))?;
        let content = encrypt_payload(&self.keypair.self_key()?, &json)?;

        Envelope::sign(
            &self.keypair,
            EventKind::EncryptedDirect,
            unix_seconds(note.updated_at),
            vec![
                tag(["p".to_string(), self.public_key()]),
                tag(["d".to_string(), note_d_tag(&note.id)]),
            ],
            content,
        )
    }

    /// Kind 30001 with the fixed ontology `d` tag.
    pub fn encode_ontology(&self, ontology: &Ontology) -> SyncResult<Envelope> {
        let json = serde_json::to_string(ontology)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode ontology: {}", e)))?;

        Envelope::sign(
            &self.keypair,
            EventKind::Ontology,
            unix_seconds(ontology.updated_at),
            vec![tag(["d", ONTOLOGY_D_TAG])],
            json,
        )
    }

    /// Kind 5 citing every envelope in `targets`.
    pub fn encode_tombstone(&self, targets: &[String], reason: &str) -> SyncResult<Envelope> {
        let mut tags: Vec<Vec<String>> = targets.iter().map(|t| tag(["e", t.as_str()])).collect();
        tags.push(tag(["reason", reason]));

        Envelope::sign(
            &self.keypair,
            EventKind::Deletion,
            unix_seconds(Utc::now()),
            tags,
            reason.to_string(),
        )
    }

    /// Verify and decode one envelope.
    ///
    /// Errors are per envelope (`SignatureInvalid`, `Parse`,
    /// `EncryptDecrypt`); callers processing a batch skip and continue.
    pub fn decode(&self, envelope: &Envelope) -> SyncResult<DecodedEvent> {
        envelope.verify()?;

        match envelope.event_kind() {
            Some(EventKind::PublicNote) => self.decode_public_note(envelope),
            Some(EventKind::EncryptedDirect) => self.decode_encrypted(envelope),
            Some(EventKind::Deletion) => Ok(DecodedEvent::Deletion(Deletion {
                event_id: envelope.id.clone(),
                author: envelope.pubkey.clone(),
                targets: envelope.tag_values("e").map(str::to_string).collect(),
                reason: envelope.tag_value("reason").map(str::to_string),
            })),
            Some(EventKind::Ontology) => {
                if envelope.tag_value("d") != Some(ONTOLOGY_D_TAG) {
                    return Err(SyncError::Parse(format!(
                        "Envelope {} is not the ontology record",
                        envelope.id
                    )));
                }
                let ontology: Ontology = serde_json::from_str(&envelope.content)
                    .map_err(|e| SyncError::Parse(format!("Invalid ontology JSON: {}", e)))?;
                Ok(DecodedEvent::Ontology(ontology))
            }
            None => Err(SyncError::Parse(format!(
                "Unsupported envelope kind {}",
                envelope.kind
            ))),
        }
    }

    fn decode_public_note(&self, envelope: &Envelope) -> SyncResult<DecodedEvent> {
        let published_at = match envelope.tag_value("published_at") {
            Some(raw) => {
                let secs = raw
                    .parse::<u64>()
                    .map_err(|e| SyncError::Parse(format!("Invalid published_at: {}", e)))?;
                from_unix_seconds(secs)?
            }
            None => from_unix_seconds(envelope.created_at)?,
        };

        let values = envelope
            .tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some("param") && t.len() >= 3)
            .map(|t| (t[1].clone(), t[2].clone()))
            .collect();

        Ok(DecodedEvent::PublicNote(PublicNote {
            event_id: envelope.id.clone(),
            author: envelope.pubkey.clone(),
            note_id: envelope.tag_value("d").map(str::to_string),
            title: envelope.tag_value("title").map(str::to_string),
            content: envelope.content.clone(),
            tags: envelope.tag_values("t").map(str::to_string).collect(),
            values,
            published_at,
        }))
    }

    fn decode_encrypted(&self, envelope: &Envelope) -> SyncResult<DecodedEvent> {
        let me = self.public_key();
        let recipient = envelope.tag_value("p").unwrap_or_default();
        let self_note_id = envelope.tag_value("d").and_then(note_id_from_d_tag);

        if let Some(note_id) = self_note_id {
            if envelope.pubkey == me && recipient == me {
                let json = decrypt_payload(&self.keypair.self_key()?, &envelope.content)?;
                let note: Note = serde_json::from_str(&json)
                    .map_err(|e| SyncError::Parse(format!("Invalid note JSON: {}", e)))?;
                if note.id != note_id {
                    return Err(SyncError::Parse(format!(
                        "Note id {} does not match d tag {}",
                        note.id, note_id
                    )));
                }
                return Ok(DecodedEvent::SelfNote(SelfNote {
                    note,
                    event_id: envelope.id.clone(),
                    created_at: envelope.created_at,
                }));
            }
        }

        let peer = if envelope.pubkey == me {
            recipient.to_string()
        } else if recipient == me {
            envelope.pubkey.clone()
        } else {
            return Err(SyncError::EncryptDecrypt(format!(
                "Envelope {} is not addressed to this identity",
                envelope.id
            )));
        };

        let key = self.keypair.conversation_key(&parse_public_key(&peer)?)?;
        let content = decrypt_payload(&key, &envelope.content)?;

        Ok(DecodedEvent::DirectMessage(DirectMessage {
            id: envelope.id.clone(),
            from: envelope.pubkey.clone(),
            to: recipient.to_string(),
            content,
            created_at: from_unix_seconds(envelope.created_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn codec() -> EventCodec {
        EventCodec::new(Keypair::generate().unwrap())
    }

    fn sample_note() -> Note {
        let mut note = Note::new("Groceries", "<p>milk</p>")
            .with_tags(["home", "list"])
            .with_value("priority", "high");
        note.updated_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap();
        note
    }

    #[test]
    fn test_self_note_roundtrip() {
        let codec = codec();
        let note = sample_note();
        let env = codec.encode_self_note(&note).unwrap();

        assert_eq!(env.kind, 4);
        assert_eq!(env.created_at, unix_seconds(note.updated_at));
        assert_eq!(env.tag_value("d"), Some(note_d_tag(&note.id).as_str()));
        assert_eq!(env.tag_value("p"), Some(codec.public_key().as_str()));
        assert!(!env.content.contains("milk"));

        match codec.decode(&env).unwrap() {
            DecodedEvent::SelfNote(decoded) => {
                assert_eq!(decoded.note, note);
                assert_eq!(decoded.event_id, env.id);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_self_note_is_opaque_to_other_identities() {
        let alice = codec();
        let bob = codec();
        let env = alice.encode_self_note(&sample_note()).unwrap();
        assert!(matches!(bob.decode(&env), Err(SyncError::EncryptDecrypt(_))));
    }

    #[test]
    fn test_direct_message_both_directions() {
        let alice = codec();
        let bob = codec();
        let env = alice
            .encode_direct_message(&bob.public_key(), "hi bob")
            .unwrap();

        for reader in [&alice, &bob] {
            match reader.decode(&env).unwrap() {
                DecodedEvent::DirectMessage(dm) => {
                    assert_eq!(dm.content, "hi bob");
                    assert_eq!(dm.from, alice.public_key());
                    assert_eq!(dm.to, bob.public_key());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_public_note_honors_privacy_flags() {
        let codec = codec();
        let note = sample_note();

        let hidden = codec
            .encode_public_note(
                &note,
                &PrivacySettings {
                    share_tags_publicly: false,
                    share_values_publicly: false,
                },
            )
            .unwrap();
        assert_eq!(hidden.tag_values("t").count(), 0);
        assert_eq!(hidden.tag_values("param").count(), 0);
        assert_eq!(hidden.tag_value("title"), Some("Groceries"));
        assert!(hidden.tag_value("published_at").is_some());

        let shared = codec
            .encode_public_note(
                &note,
                &PrivacySettings {
                    share_tags_publicly: true,
                    share_values_publicly: true,
                },
            )
            .unwrap();
        match codec.decode(&shared).unwrap() {
            DecodedEvent::PublicNote(public) => {
                assert_eq!(public.tags, vec!["home", "list"]);
                assert_eq!(public.values.get("priority").map(String::as_str), Some("high"));
                assert_eq!(public.note_id.as_deref(), Some(note.id.as_str()));
                assert_eq!(public.content, note.content);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ontology_roundtrip() {
        let codec = codec();
        let mut ontology = Ontology::new();
        let root = ontology.add_node("Projects", None);
        ontology.add_node("Rust", Some(&root));

        let env = codec.encode_ontology(&ontology).unwrap();
        assert_eq!(env.kind, 30001);
        assert_eq!(env.tag_value("d"), Some(ONTOLOGY_D_TAG));
        assert_eq!(
            codec.decode(&env).unwrap(),
            DecodedEvent::Ontology(ontology)
        );
    }

    #[test]
    fn test_tombstone_cites_targets() {
        let codec = codec();
        let targets = vec!["e1".to_string(), "e2".to_string()];
        let env = codec.encode_tombstone(&targets, TOMBSTONE_REASON).unwrap();
        assert_eq!(env.kind, 5);

        match codec.decode(&env).unwrap() {
            DecodedEvent::Deletion(deletion) => {
                assert_eq!(deletion.targets, targets);
                assert_eq!(deletion.reason.as_deref(), Some(TOMBSTONE_REASON));
                assert_eq!(deletion.author, codec.public_key());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_envelopes_are_per_item_errors() {
        let codec = codec();

        let unknown = Envelope::sign(
            &Keypair::generate().unwrap(),
            EventKind::PublicNote,
            1,
            vec![],
            String::new(),
        )
        .map(|mut e| {
            e.kind = 7;
            e
        })
        .unwrap();
        let err = codec.decode(&unknown).unwrap_err();
        assert!(err.is_item_level());

        let mut bad_ontology = codec.encode_ontology(&Ontology::new()).unwrap();
        bad_ontology.content = "{not json".to_string();
        bad_ontology.id = Envelope::compute_id(
            &bad_ontology.pubkey,
            bad_ontology.created_at,
            bad_ontology.kind,
            &bad_ontology.tags,
            &bad_ontology.content,
        )
        .unwrap();
        // id no longer matches the signature
        assert!(matches!(
            codec.decode(&bad_ontology),
            Err(SyncError::SignatureInvalid(_))
        ));

        let garbage = Envelope::sign(
            &codec.keypair,
            EventKind::Ontology,
            1,
            vec![tag(["d", ONTOLOGY_D_TAG])],
            "{not json".to_string(),
        )
        .unwrap();
        assert!(matches!(codec.decode(&garbage), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_d_tag_helpers() {
        assert_eq!(note_id_from_d_tag(&note_d_tag("n1")), Some("n1"));
        assert_eq!(note_id_from_d_tag("notesync-note:"), None);
        assert_eq!(note_id_from_d_tag("other:n1"), None);
    }
}
