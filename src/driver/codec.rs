//! String codec for driver encodings.
//!
//! Format, slots in the kind's layout order:
//! ```text
//! <slot>|<slot>|<slot>|<slot>
//! slot := "*" | "?" | member("," member)*
//! ```
//! `*` is the wildcard token, `?` the unresolved token. Explicit member
//! lists render sorted and de-duplicated so equal selections always
//! encode to the same string.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::warn;

use super::{DriverSelection, Selection};
use crate::entity::EntityKind;

/// Separates the per-dimension slots.
pub const SLOT_SEPARATOR: char = '|';

/// Separates members inside an explicit slot.
pub const MEMBER_SEPARATOR: char = ',';

/// Reserved token for `Selection::Wildcard`.
pub const WILDCARD_TOKEN: &str = "*";

/// Reserved token for `Selection::Unresolved`.
pub const UNRESOLVED_TOKEN: &str = "?";

/// Errors produced by strict decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed driver encoding '{encoding}': {reason}")]
    MalformedEncoding {
        encoding: String,
        reason: String,
    },
}

/// Check that `key` can be stored as a member and round-trip the codec.
///
/// Returns the reason on rejection.
pub fn check_member_key(key: &str) -> Result<(), &'static str> {
    if key.trim().is_empty() {
        return Err("member key cannot be empty");
    }
    if key.trim() != key {
        return Err("member key cannot have surrounding whitespace");
    }
    if key.contains(SLOT_SEPARATOR) || key.contains(MEMBER_SEPARATOR) {
        return Err("member key cannot contain '|' or ','");
    }
    if key == WILDCARD_TOKEN || key == UNRESOLVED_TOKEN {
        return Err("member key cannot be a reserved token");
    }
    Ok(())
}

fn parse_slot(token: &str) -> Result<Selection, String> {
    let token = token.trim();
    match token {
        WILDCARD_TOKEN => return Ok(Selection::Wildcard),
        UNRESOLVED_TOKEN | "" => return Ok(Selection::Unresolved),
        _ => {}
    }

    let mut members = BTreeSet::new();
    for raw in token.split(MEMBER_SEPARATOR) {
        let member = raw.trim();
        if member.is_empty() {
            return Err(format!("empty member in slot '{token}'"));
        }
        if member == WILDCARD_TOKEN || member == UNRESOLVED_TOKEN {
            return Err(format!("reserved token mixed with members in slot '{token}'"));
        }
        members.insert(member.to_string());
    }
    Ok(Selection::explicit(members))
}

fn split_slots(encoding: &str) -> Vec<&str> {
    if encoding.trim().is_empty() {
        return Vec::new();
    }
    encoding.split(SLOT_SEPARATOR).collect()
}

/// Strictly decode `encoding` for an entity of `kind`.
///
/// Fails on a slot count different from the layout or on any unparseable
/// slot. Use [`decode_lenient`] on read paths.
pub fn decode(kind: EntityKind, encoding: &str) -> Result<DriverSelection, CodecError> {
    let malformed = |reason: String| CodecError::MalformedEncoding {
        encoding: encoding.to_string(),
        reason,
    };

    let tokens = split_slots(encoding);
    let expected = kind.layout().len();
    if tokens.len() != expected {
        return Err(malformed(format!(
            "expected {expected} slots for {kind}, found {}",
            tokens.len()
        )));
    }

    let slots = tokens
        .into_iter()
        .map(parse_slot)
        .collect::<Result<Vec<_>, _>>()
        .map_err(malformed)?;

    Ok(DriverSelection { kind, slots })
}

/// Decode `encoding`, recovering from every malformation.
///
/// Legacy short encodings are padded with `Wildcard`, surplus slots are
/// dropped, and an unparseable slot defaults to `Wildcard`. Each recovery
/// is logged.
pub fn decode_lenient(kind: EntityKind, encoding: &str) -> DriverSelection {
    let layout = kind.layout();
    let tokens = split_slots(encoding);

    if tokens.len() > layout.len() {
        warn!(
            %kind,
            encoding,
            found = tokens.len(),
            expected = layout.len(),
            "driver encoding has surplus slots; keeping the leading ones"
        );
    }

    let mut slots = Vec::with_capacity(layout.len());
    for (i, dimension) in layout.iter().enumerate() {
        let selection = match tokens.get(i) {
            None => Selection::Wildcard,
            Some(token) => parse_slot(token).unwrap_or_else(|reason| {
                warn!(%kind, %dimension, encoding, reason, "malformed driver slot; defaulting to wildcard");
                Selection::Wildcard
            }),
        };
        slots.push(selection);
    }

    DriverSelection { kind, slots }
}

fn encode_slot(selection: &Selection) -> String {
    match selection {
        Selection::Wildcard => WILDCARD_TOKEN.to_string(),
        Selection::Unresolved => UNRESOLVED_TOKEN.to_string(),
        Selection::Explicit(set) if set.is_empty() => UNRESOLVED_TOKEN.to_string(),
        Selection::Explicit(set) => {
            let members: Vec<&str> = set.iter().map(String::as_str).collect();
            members.join(&MEMBER_SEPARATOR.to_string())
        }
    }
}

/// Render a selection as its driver encoding.
#[must_use]
pub fn encode(selection: &DriverSelection) -> String {
    let slots: Vec<String> = selection.slots().iter().map(encode_slot).collect();
    slots.join(&SLOT_SEPARATOR.to_string())
}

/// Apply the "full coverage means wildcard" rule.
///
/// An explicit selection equal to the non-empty current member set
/// collapses to `Wildcard`; anything else is returned unchanged.
#[must_use]
pub fn normalize(selection: &Selection, current_members: &BTreeSet<String>) -> Selection {
    match selection {
        Selection::Explicit(set) if !current_members.is_empty() && set == current_members => {
            Selection::Wildcard
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dimension;

    #[test]
    fn test_decode_tokens() {
        let sel = decode(EntityKind::Object, "*|Finance,Banking|?|").unwrap();
        assert_eq!(sel.get(Dimension::Sector), Some(&Selection::Wildcard));
        assert_eq!(
            sel.get(Dimension::Domain),
            Some(&Selection::explicit(["Banking", "Finance"]))
        );
        assert_eq!(sel.get(Dimension::Country), Some(&Selection::Unresolved));
        // Empty explicit slot is treated as unresolved.
        assert_eq!(sel.get(Dimension::ObjectClarifier), Some(&Selection::Unresolved));
    }

    #[test]
    fn test_decode_rejects_slot_count() {
        let err = decode(EntityKind::Object, "*|*").unwrap_err();
        assert!(err.to_string().contains("expected 4 slots"));
        assert!(decode(EntityKind::Object, "").is_err());
    }

    #[test]
    fn test_lenient_pads_legacy_short_encodings() {
        let sel = decode_lenient(EntityKind::Variable, "Energy");
        assert_eq!(sel.get(Dimension::Sector), Some(&Selection::explicit(["Energy"])));
        assert_eq!(sel.get(Dimension::Domain), Some(&Selection::Wildcard));
        assert_eq!(sel.get(Dimension::VariableClarifier), Some(&Selection::Wildcard));

        assert_eq!(decode_lenient(EntityKind::Object, ""), DriverSelection::wildcard(EntityKind::Object));
    }

    #[test]
    fn test_lenient_defaults_bad_slot_to_wildcard() {
        let sel = decode_lenient(EntityKind::Object, "A,,B|*,X|?|C|D");
        assert_eq!(sel.get(Dimension::Sector), Some(&Selection::Wildcard));
        assert_eq!(sel.get(Dimension::Domain), Some(&Selection::Wildcard));
        assert_eq!(sel.get(Dimension::Country), Some(&Selection::Unresolved));
        assert_eq!(sel.get(Dimension::ObjectClarifier), Some(&Selection::explicit(["C"])));
    }

    #[test]
    fn test_encode_is_sorted_and_deduplicated() {
        let sel = decode(EntityKind::Object, "b, a ,b|*|?|c").unwrap();
        assert_eq!(encode(&sel), "a,b|*|?|c");
    }

    #[test]
    fn test_normalize_full_coverage() {
        let members: BTreeSet<String> = ["A", "B"].into_iter().map(String::from).collect();
        assert_eq!(normalize(&Selection::explicit(["B", "A"]), &members), Selection::Wildcard);
        assert_eq!(
            normalize(&Selection::explicit(["A"]), &members),
            Selection::explicit(["A"])
        );
        assert_eq!(normalize(&Selection::Unresolved, &members), Selection::Unresolved);

        // Nothing collapses against an empty dimension.
        let empty = BTreeSet::new();
        assert_eq!(
            normalize(&Selection::explicit(["A"]), &empty),
            Selection::explicit(["A"])
        );
    }

    #[test]
    fn test_member_key_rules() {
        assert!(check_member_key("Oil & Gas").is_ok());
        assert!(check_member_key("").is_err());
        assert!(check_member_key(" padded").is_err());
        assert!(check_member_key("a,b").is_err());
        assert!(check_member_key("a|b").is_err());
        assert!(check_member_key("*").is_err());
        assert!(check_member_key("?").is_err());
    }
}
