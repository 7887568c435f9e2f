use getrandom::getrandom;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn validate_task_id(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("task id must be non-empty".to_string());
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err("task id must use only ASCII letters, digits, '-' or '_'".to_string())
}

/// Short base36 suffix for interactive task ids, so two runs started within
/// the same second do not collide.
pub fn random_suffix(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    if getrandom(&mut bytes).is_err() {
        let seed = std::process::id() as usize;
        for (idx, byte) in bytes.iter_mut().enumerate() {
            *byte = (seed.wrapping_add(idx * 31) % 256) as u8;
        }
    }
    bytes
        .iter()
        .map(|b| BASE36_ALPHABET[(*b as usize) % BASE36_ALPHABET.len()] as char)
        .collect()
}

pub fn interactive_task_id(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("live_{}_{}", now.format("%Y%m%d_%H%M%S"), random_suffix(4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_validation() {
        assert!(validate_task_id("task-01_a").is_ok());
        assert!(validate_task_id("").is_err());
        assert!(validate_task_id("../escape").is_err());
        assert!(validate_task_id("with space").is_err());
    }

    #[test]
    fn random_suffix_has_requested_length_and_alphabet() {
        let suffix = random_suffix(6);
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn interactive_ids_are_valid_task_ids() {
        let id = interactive_task_id(chrono::Utc::now());
        assert!(validate_task_id(&id).is_ok());
        assert!(id.starts_with("live_"));
    }
}
