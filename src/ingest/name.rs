//! Name canonicalization
//!
//! Parses a raw marketplace listing name into a structured [`ItemIdentity`]:
//! StatTrak/Souvenir markers, the parenthetical wear-condition suffix, and
//! the Doppler phase token.

use crate::types::{ItemIdentity, Phase, Wear};

/// Marker substring for the StatTrak designation. The trademark-symbol
/// variant is covered by the same check since it contains the plain token.
pub const STATTRAK_MARKER: &str = "StatTrak";

/// Marker substring for the Souvenir designation
pub const SOUVENIR_MARKER: &str = "Souvenir";

/// Prefixes stripped from the name when building the base, trademark
/// variant first so the plain pass does not leave the symbol behind.
const STRIP_PREFIXES: [&str; 3] = ["StatTrak™ ", "StatTrak ", "Souvenir "];

/// Parse a raw marketplace name into a structured identity.
///
/// Marker flags are detected on the full original string before any
/// stripping; the wear suffix is matched and stripped first, then the marker
/// prefixes, leaving the base name. Phase tokens are detected by substring
/// and left in the base.
pub fn parse_listing_name(name: &str) -> ItemIdentity {
    let stattrak = name.contains(STATTRAK_MARKER);
    let souvenir = name.contains(SOUVENIR_MARKER);

    let (rest, wear) = detect_wear(name);

    let mut base = rest.to_string();
    for prefix in STRIP_PREFIXES {
        base = base.replace(prefix, "");
    }
    let base = base.trim().to_string();

    let phase = Phase::ALL.iter().copied().find(|p| name.contains(p.token()));

    ItemIdentity {
        base,
        stattrak,
        souvenir,
        wear,
        phase,
    }
}

/// Match a trailing `(condition)` suffix in fixed tier order; first match
/// wins. Returns the string with the suffix stripped and trailing whitespace
/// trimmed. Idempotent: a stripped base matches no further condition.
pub fn detect_wear(name: &str) -> (&str, Option<Wear>) {
    for wear in Wear::ALL {
        let suffix = format!("({})", wear.label());
        if let Some(stripped) = name.strip_suffix(&suffix) {
            return (stripped.trim_end(), Some(wear));
        }
    }
    (name, None)
}
