use rand::Rng;

/// Longest hostname accepted by the container engine.
const MAX_HOSTNAME: usize = 64;

/// Characters kept from each end of a condensed hostname.
const HOSTNAME_KEEP: usize = 30;

/// Replace every character that is not allowed in a container name with `_`.
pub fn sanitize_container_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Shorten a hostname that would exceed the engine's limit, keeping both ends.
pub fn condense_hostname(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() < MAX_HOSTNAME {
        return name.to_string();
    }
    let head: String = chars[..HOSTNAME_KEEP].iter().collect();
    let tail: String = chars[chars.len() - HOSTNAME_KEEP..].iter().collect();
    format!("{head}_._{tail}")
}

/// Random lowercase suffix used to disambiguate short-lived containers.
pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect()
}
