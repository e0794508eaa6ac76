//! Utility module
//!
//! Helpers for drawing the random values a responder hands out in one session.

use rand::Rng;

use crate::core::{Secret, ServerConfig};

/// Random values the responder commits to when a session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub num: u32,
    pub length: u32,
    pub num2: u32,
    pub len2: u32,
    pub fill: u8,
    pub secret_a: Secret,
    pub secret_b: Secret,
    pub secret_c: Secret,
    pub secret_d: Secret,
}

impl SessionParams {
    /// Draws every parameter from the ranges in `config`
    pub fn draw<R: Rng + ?Sized>(config: &ServerConfig, rng: &mut R) -> Self {
        SessionParams {
            num: rng.gen_range(config.num_range.clone()),
            length: rng.gen_range(config.length_range.clone()),
            num2: rng.gen_range(config.num2_range.clone()),
            len2: rng.gen_range(config.len2_range.clone()),
            fill: config.fill.unwrap_or_else(|| random_letter(rng)),
            secret_a: Secret::generate(rng),
            secret_b: Secret::generate(rng),
            secret_c: Secret::generate(rng),
            secret_d: Secret::generate(rng),
        }
    }
}

/// Picks an ASCII letter, upper or lower case
pub fn random_letter<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    let index = rng.gen_range(0..52u8);
    if index < 26 {
        b'A' + index
    } else {
        b'a' + index - 26
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_params_within_ranges() {
        let config = ServerConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let params = SessionParams::draw(&config, &mut rng);
            assert!(config.num_range.contains(&params.num));
            assert!(config.length_range.contains(&params.length));
            assert!(config.num2_range.contains(&params.num2));
            assert!(config.len2_range.contains(&params.len2));
            assert!(params.fill.is_ascii_alphabetic());
            assert_ne!(params.secret_a, Secret::NONE);
        }
    }

    #[test]
    fn test_fixed_fill() {
        let config = ServerConfig {
            fill: Some(b'X'),
            num_range: 3..=3,
            ..Default::default()
        };
        let params = SessionParams::draw(&config, &mut StdRng::seed_from_u64(1));
        assert_eq!(params.fill, b'X');
        assert_eq!(params.num, 3);
    }

    #[test]
    fn test_random_letter_covers_both_cases() {
        let mut rng = StdRng::seed_from_u64(3);
        let letters: Vec<u8> = (0..1000).map(|_| random_letter(&mut rng)).collect();
        assert!(letters.iter().any(u8::is_ascii_uppercase));
        assert!(letters.iter().any(u8::is_ascii_lowercase));
        assert!(letters.iter().all(u8::is_ascii_alphabetic));
    }
}
