/// Lowercase, strip punctuation and collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title.to_lowercase()
        .trim()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_target(target: &str) -> String {
    target.trim().trim_end_matches('/').to_lowercase()
}

/// Content-derived key for a vulnerability finding: the CVE when present,
/// otherwise the normalized title, always scoped to the target.
pub fn finding_key(cve_id: Option<&str>, title: &str, target: &str) -> String {
    let target = normalize_target(target);
    match cve_id.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cve) => format!("cve:{}|{}", cve.to_uppercase(), target),
        None => format!("title:{}|{}", normalize_title(title), target),
    }
}

pub fn credential_key(service: &str, username: &str, target: &str) -> String {
    format!(
        "cred:{}|{}|{}",
        service.trim().to_lowercase(),
        username.trim(),
        normalize_target(target)
    )
}

pub fn exploitation_key(original_finding_id: &str) -> String {
    format!("exploit:{}", original_finding_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  SQL   Injection!! (id) "), "sql injection id");
    }

    #[test]
    fn test_cve_key_ignores_title() {
        let a = finding_key(Some("cve-2021-41773"), "Apache path traversal", "http://10.0.0.1/");
        let b = finding_key(Some("CVE-2021-41773"), "Different wording", "HTTP://10.0.0.1");
        assert_eq!(a, b);
        assert_eq!(a, "cve:CVE-2021-41773|http://10.0.0.1");
    }

    #[test]
    fn test_title_key_fallback() {
        let a = finding_key(None, "Directory listing enabled.", "10.0.0.1");
        let b = finding_key(Some(" "), "directory listing ENABLED", "10.0.0.1");
        assert_eq!(a, b);
        assert_ne!(a, finding_key(None, "Directory listing enabled", "10.0.0.2"));
    }

    #[test]
    fn test_credential_key_includes_username() {
        assert_ne!(
            credential_key("ssh", "root", "10.0.0.1"),
            credential_key("ssh", "admin", "10.0.0.1")
        );
    }
}
