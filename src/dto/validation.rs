//! Validation helpers for DTOs.

use validator::ValidationError;

/// Parse a match-type label of the form `"2v2"` into its per-side capacity.
///
/// Both sides must be the same single digit between 1 and 9; asymmetric
/// labels are rejected.
pub fn players_per_side(label: &str) -> Option<u32> {
    let (left, right) = label.split_once('v')?;
    if left.len() != 1 || right.len() != 1 || left != right {
        return None;
    }
    let per_side: u32 = left.parse().ok()?;
    (per_side >= 1).then_some(per_side)
}

/// Validates that a match type label encodes a symmetric team size.
///
/// # Examples
///
/// ```ignore
/// validate_match_type("2v2") // Ok
/// validate_match_type("2v3") // Err - asymmetric
/// validate_match_type("0v0") // Err - empty teams
/// ```
pub fn validate_match_type(label: &str) -> Result<(), ValidationError> {
    if players_per_side(label).is_none() {
        let mut err = ValidationError::new("match_type_format");
        err.message = Some(
            format!("match type `{label}` must look like `2v2` with 1-9 players per side").into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_players_per_side_valid() {
        assert_eq!(players_per_side("1v1"), Some(1));
        assert_eq!(players_per_side("2v2"), Some(2));
        assert_eq!(players_per_side("9v9"), Some(9));
    }

    #[test]
    fn test_players_per_side_invalid() {
        assert_eq!(players_per_side("2v3"), None); // asymmetric
        assert_eq!(players_per_side("0v0"), None); // empty teams
        assert_eq!(players_per_side("10v10"), None); // two digits
        assert_eq!(players_per_side("2x2"), None); // wrong separator
        assert_eq!(players_per_side(""), None);
    }

    #[test]
    fn test_validate_match_type() {
        assert!(validate_match_type("2v2").is_ok());
        assert!(validate_match_type("2v3").is_err());
        assert!(validate_match_type("duel").is_err());
    }
}
