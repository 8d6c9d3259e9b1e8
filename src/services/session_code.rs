use rand::Rng;

/// Characters a join code is drawn from.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draw a random uppercase alphanumeric code of `len` characters.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Source of join codes used when creating polls.
pub trait CodeGenerator: Send + Sync {
    /// Produce a candidate code of `len` characters.
    fn next_code(&self, len: usize) -> String;
}

/// Draws codes from the thread-local random generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn next_code(&self, len: usize) -> String {
        generate_code(&mut rand::rng(), len)
    }
}

/// Canonical form of a code typed by a participant: trimmed and uppercased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Whether `code` is a non-empty run of characters from [`CODE_ALPHABET`].
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn generated_codes_use_the_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = generate_code(&mut rng, 6);
            assert_eq!(code.len(), 6);
            assert!(is_valid_code(&code), "{code}");
        }
    }

    #[test]
    fn typed_codes_are_normalized() {
        assert_eq!(normalize_code("  xyz123 \n"), "XYZ123");
        assert!(!is_valid_code(&normalize_code("   ")));
        assert!(!is_valid_code("AB-12"));
    }
}
