use rand::Rng;

/// Generate a human-readable reference code: two random uppercase
/// letters followed by six digits, e.g. "KX204917". Uniqueness is
/// enforced by the storage layer, not by retrying here.
pub fn generate_booking_ref() -> String {
    let mut rng = rand::thread_rng();
    let letters: String = (0..2).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
    let digits: String = (0..6).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect();
    format!("{}{}", letters, digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_format() {
        for _ in 0..50 {
            let code = generate_booking_ref();
            assert_eq!(code.len(), 8);
            assert!(code[..2].chars().all(|c| c.is_ascii_uppercase()));
            assert!(code[2..].chars().all(|c| c.is_ascii_digit()));
        }
    }
}
