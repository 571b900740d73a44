//! Password authentication helpers.

/// `"md5" + hex(md5(hex(md5(password ∥ user)) ∥ salt))`.
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5_hex(&[password.as_bytes(), user.as_bytes()].concat());
    let outer = md5_hex(&[inner.as_bytes(), &salt[..]].concat());
    format!("md5{outer}")
}

fn md5_hex(data: &[u8]) -> String {
    use md5::Digest;
    let digest = md5::Md5::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        // md5(md5("password" + "user") + salt) with salt = [1,2,3,4]
        let got = md5_password("user", "password", [1, 2, 3, 4]);
        assert!(got.starts_with("md5"));
        assert_eq!(got.len(), 3 + 32);
    }

    #[test]
    fn differs_by_salt() {
        let a = md5_password("user", "password", [0, 0, 0, 0]);
        let b = md5_password("user", "password", [0, 0, 0, 1]);
        assert_ne!(a, b);
    }
}
