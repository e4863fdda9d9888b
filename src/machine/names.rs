// Machine name handling
//
// mDNS names are ASCII-case-insensitive like ordinary DNS and use fully
// composed UTF-8, so comparisons go through the same normalization in every
// resolution mode.

use crate::config::constants::{DEVKIT_SERVICE, LOCAL_DOMAIN};
use unicode_normalization::UnicodeNormalization;

/// NFC compose, ASCII case-fold, drop trailing dots. Non-ASCII letters keep their case.
///
/// Composition comes first: NFC maps some code points onto ASCII letters
/// (U+212A KELVIN SIGN to `K`).
pub fn normalize_name(name: &str) -> String {
    let composed: String = name.nfc().collect();
    composed
        .to_ascii_lowercase()
        .trim_end_matches('.')
        .to_string()
}

/// Whether `name` carries one of the fully-qualified devkit service suffixes,
/// which makes it unambiguously a service name.
pub fn has_service_suffix(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let service = format!(".{}", DEVKIT_SERVICE);
    [
        format!("{}.{}.", service, LOCAL_DOMAIN),
        format!("{}.{}", service, LOCAL_DOMAIN),
        format!("{}.", service),
        service.clone(),
    ]
    .iter()
    .any(|suffix| lower.ends_with(suffix.as_str()))
}

/// Reduce `deck.local.`, `deck._steamos-devkit._tcp.local` and friends to the
/// bare instance name `deck`. Repeats until nothing more can be stripped.
pub fn service_instance_name(name: &str) -> String {
    let mut current = name.to_string();
    loop {
        let mut next = current.trim_end_matches('.').to_string();
        next = strip_suffix_ignore_ascii_case(&next, &format!(".{}", LOCAL_DOMAIN));
        next = strip_suffix_ignore_ascii_case(&next, &format!(".{}", DEVKIT_SERVICE));
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Normalized form of a name interpreted as a discovery service name
pub fn normalize_service_name(name: &str) -> String {
    normalize_name(&service_instance_name(name))
}

fn strip_suffix_ignore_ascii_case(name: &str, suffix: &str) -> String {
    let split = name.len().checked_sub(suffix.len());
    match split {
        Some(at)
            if at > 0
                && name.is_char_boundary(at)
                && name[at..].eq_ignore_ascii_case(suffix) =>
        {
            name[..at].to_string()
        }
        _ => name.to_string(),
    }
}
