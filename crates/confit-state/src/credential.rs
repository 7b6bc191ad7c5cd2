use serde::{Deserialize, Serialize};

/// Passwords that fail the policy outright regardless of character classes.
/// Matched case-insensitively against the full password.
const WEAK_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "passw0rd",
    "12345678",
    "123456789",
    "qwertyuiop",
    "iloveyou",
    "admin123",
    "root1234",
    "letmein1",
    "welcome1",
    "changeme",
];

/// An account credential candidate. The password is deliberately excluded
/// from serde output so `--json` results never echo it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    #[serde(skip, default)]
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Score a credential against the complexity policy.
///
/// Returns the list of violated rules; an empty list means the credential
/// passes. A non-empty list is a soft warning (operators may deliberately
/// choose a simple credential for short-lived instances), never a hard
/// rejection.
pub fn score_credential(credential: &Credential) -> Vec<String> {
    let mut violations = Vec::new();
    let password = credential.password();
    let lowered = password.to_lowercase();

    if password.chars().count() < 8 {
        violations.push("password is shorter than 8 characters".to_owned());
    }

    let classes = [
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if classes < 3 {
        violations.push(format!(
            "only {classes} of 4 character classes present (need upper, lower, digit, symbol; at least 3)"
        ));
    }

    let user_lower = credential.username.to_lowercase();
    if !user_lower.is_empty() && lowered.contains(&user_lower) {
        violations.push("password contains the username".to_owned());
    }

    if WEAK_PASSWORDS.contains(&lowered.as_str()) {
        violations.push("password is in the known weak-password set".to_owned());
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_credential_passes() {
        let c = Credential::new("deploy", "Tr4verse!Vault");
        assert!(score_credential(&c).is_empty());
    }

    #[test]
    fn short_password_flagged() {
        let c = Credential::new("deploy", "Ab1!");
        let v = score_credential(&c);
        assert!(v.iter().any(|m| m.contains("shorter than 8")));
    }

    #[test]
    fn missing_classes_flagged() {
        let c = Credential::new("deploy", "alllowercase");
        let v = score_credential(&c);
        assert!(v.iter().any(|m| m.contains("character classes")));
    }

    #[test]
    fn username_containment_flagged() {
        let c = Credential::new("deploy", "Deploy#2024x");
        let v = score_credential(&c);
        assert!(v.iter().any(|m| m.contains("username")));
    }

    #[test]
    fn weak_set_flagged_case_insensitively() {
        let c = Credential::new("ops", "PassW0rd");
        let v = score_credential(&c);
        assert!(v.iter().any(|m| m.contains("weak-password set")));
    }

    #[test]
    fn password_not_serialized() {
        let c = Credential::new("ops", "Secret#999");
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("Secret#999"));
        assert!(json.contains("ops"));
    }
}
