//! Join artifact extraction
//!
//! kubeadm's own output is verbose and changes between releases, so the
//! init and token scripts print [`JOIN_MARKER`] right before the output of
//! `kubeadm token create --print-join-command`, whose one-line format is
//! stable. Parsing looks for the marker first and falls back to scanning for
//! a (possibly backslash-continued) `kubeadm join` line.
//!
//! Nothing here fails: fields that cannot be found stay empty and callers
//! treat an incomplete [`JoinArtifacts`] as "ask the control plane again".

use serde::{Deserialize, Serialize};

/// Printed on its own line before the join command
pub const JOIN_MARKER: &str = "KUBEFORGE_JOIN_COMMAND";

/// Prefix of the line carrying the certificate key for control-plane joins
pub const CERT_KEY_MARKER: &str = "KUBEFORGE_CERTIFICATE_KEY";

/// Backslash-continued lines followed after the first join line
const MAX_CONTINUATION_LINES: usize = 3;

/// Credentials for joining a node to an existing control plane
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinArtifacts {
    /// Single-line `kubeadm join ...` command, empty when not found
    pub join_command: String,
    pub token: String,
    pub ca_cert_hash: String,
    /// Key for decrypting uploaded control-plane certificates (HA joins only)
    pub certificate_key: Option<String>,
}

impl JoinArtifacts {
    /// Token and CA hash are both present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.ca_cert_hash.is_empty()
    }
}

/// Extract artifacts from a single join command
///
/// Accepts backslash-continued input and `--flag=value` spellings. Returns
/// empty fields for anything malformed.
#[must_use]
pub fn parse_join_command(command: &str) -> JoinArtifacts {
    let normalized = command.replace("\\\r\n", " ").replace("\\\n", " ");
    let words: Vec<&str> = normalized
        .split_whitespace()
        .filter(|word| *word != "\\")
        .collect();

    let Some(start) = words
        .windows(2)
        .position(|pair| pair[0] == "kubeadm" && pair[1] == "join")
    else {
        return JoinArtifacts::default();
    };
    let words = &words[start..];

    let token = flag_value(words, "--token")
        .filter(|value| is_bootstrap_token(value))
        .unwrap_or_default();
    let ca_cert_hash = flag_value(words, "--discovery-token-ca-cert-hash")
        .filter(|value| is_ca_cert_hash(value))
        .unwrap_or_default();
    let certificate_key = flag_value(words, "--certificate-key")
        .filter(|value| is_certificate_key(value))
        .map(str::to_string);

    JoinArtifacts {
        join_command: words.join(" "),
        token: token.to_string(),
        ca_cert_hash: ca_cert_hash.to_string(),
        certificate_key,
    }
}

/// Extract artifacts from the output of the control-plane init or token script
#[must_use]
pub fn parse_init_output(output: &str) -> JoinArtifacts {
    let lines: Vec<&str> = output.lines().collect();

    let mut artifacts = join_after_marker(&lines)
        .or_else(|| first_join_line(&lines))
        .map(|command| parse_join_command(&command))
        .unwrap_or_default();

    if let Some(key) = certificate_key_line(&lines) {
        artifacts.certificate_key = Some(key);
    }
    artifacts
}

fn join_after_marker(lines: &[&str]) -> Option<String> {
    let marker = lines.iter().rposition(|line| line.trim() == JOIN_MARKER)?;
    let first = marker
        + 1
        + lines[marker + 1..]
            .iter()
            .position(|line| !line.trim().is_empty())?;

    if !lines[first].contains("kubeadm join") {
        return None;
    }
    Some(with_continuations(lines, first))
}

fn first_join_line(lines: &[&str]) -> Option<String> {
    let first = lines.iter().position(|line| line.contains("kubeadm join"))?;
    Some(with_continuations(lines, first))
}

/// The line at `start` plus up to three following lines joined by trailing backslashes
fn with_continuations(lines: &[&str], start: usize) -> String {
    let mut command = lines[start].trim().to_string();
    let mut index = start;

    for _ in 0..MAX_CONTINUATION_LINES {
        if !command.ends_with('\\') {
            break;
        }
        index += 1;
        let Some(next) = lines.get(index) else {
            break;
        };
        command.pop();
        command.push(' ');
        command.push_str(next.trim());
    }

    command.trim_end_matches('\\').trim().to_string()
}

fn certificate_key_line(lines: &[&str]) -> Option<String> {
    lines.iter().rev().find_map(|line| {
        let key = line.trim().strip_prefix(CERT_KEY_MARKER)?.trim();
        is_certificate_key(key).then(|| key.to_string())
    })
}

fn flag_value<'a>(words: &[&'a str], flag: &str) -> Option<&'a str> {
    words.iter().enumerate().find_map(|(i, word)| {
        if *word == flag {
            words.get(i + 1).copied()
        } else {
            word.strip_prefix(flag)?.strip_prefix('=')
        }
    })
}

/// `<id>.<secret>` with alphanumeric halves (kubeadm uses `[a-z0-9]{6}.[a-z0-9]{16}`)
fn is_bootstrap_token(value: &str) -> bool {
    value.split_once('.').is_some_and(|(id, secret)| {
        !id.is_empty()
            && !secret.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric())
            && secret.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

fn is_ca_cert_hash(value: &str) -> bool {
    value
        .strip_prefix("sha256:")
        .is_some_and(|digest| !digest.is_empty() && digest.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_certificate_key(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "abcdef.0123456789abcdef";
    const HASH: &str =
        "sha256:4f9ac2d1e7b8c3a5f60d9e2b1c4a7f3e8d5b6c9a0e1f2d3c4b5a69788796a5b4";
    const CERT_KEY: &str = "9a8b7c6d5e4f30211234567890abcdef9a8b7c6d5e4f30211234567890abcdef";

    fn join_line() -> String {
        format!("kubeadm join 10.0.0.5:6443 --token {TOKEN} --discovery-token-ca-cert-hash {HASH}")
    }

    #[test]
    fn test_parse_join_command() {
        let artifacts = parse_join_command(&join_line());

        assert_eq!(artifacts.token, TOKEN);
        assert_eq!(artifacts.ca_cert_hash, HASH);
        assert_eq!(artifacts.join_command, join_line());
        assert!(artifacts.certificate_key.is_none());
        assert!(artifacts.is_complete());
    }

    #[test]
    fn test_parse_join_command_is_idempotent() {
        let once = parse_join_command(&format!("  sudo {} \n", join_line()));
        let twice = parse_join_command(&once.join_command);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_join_command_equals_form() {
        let artifacts = parse_join_command(&format!(
            "kubeadm join api:6443 --token={TOKEN} --discovery-token-ca-cert-hash={HASH}"
        ));
        assert_eq!(artifacts.token, TOKEN);
        assert_eq!(artifacts.ca_cert_hash, HASH);
    }

    #[test]
    fn test_parse_join_command_malformed_input_leaves_fields_empty() {
        for input in [
            "",
            "   ",
            "kubeadm init --pod-network-cidr 10.244.0.0/16",
            "kubeadm join 10.0.0.5:6443 --token",
            "kubeadm join 10.0.0.5:6443 --token not_a_token --discovery-token-ca-cert-hash md5:abc",
        ] {
            let artifacts = parse_join_command(input);
            assert!(artifacts.token.is_empty(), "token from {input:?}");
            assert!(artifacts.ca_cert_hash.is_empty(), "hash from {input:?}");
            assert!(!artifacts.is_complete());
        }
    }

    #[test]
    fn test_parse_init_output_after_marker() {
        let output = format!(
            "[init] Using Kubernetes version: v1.31.2\n\
             [preflight] Running pre-flight checks\n\
             You can now join any number of machines by running the following:\n\
             kubeadm join 192.168.1.1:6443 --token zzzzzz.zzzzzzzzzzzzzzzz \\\n\
             \t--discovery-token-ca-cert-hash sha256:ffff\n\
             {JOIN_MARKER}\n\
             {}\n\
             {CERT_KEY_MARKER} {CERT_KEY}\n",
            join_line()
        );

        let artifacts = parse_init_output(&output);
        assert_eq!(artifacts.token, TOKEN, "marker must win over earlier output");
        assert_eq!(artifacts.ca_cert_hash, HASH);
        assert_eq!(artifacts.certificate_key.as_deref(), Some(CERT_KEY));
    }

    #[test]
    fn test_parse_init_output_fallback_reassembles_continuations() {
        let output = format!(
            "Your Kubernetes control-plane has initialized successfully!\n\
             \n\
             Then you can join any number of worker nodes by running the following on each as root:\n\
             \n\
             kubeadm join 10.0.0.5:6443 --token {TOKEN} \\\n\
             \t--discovery-token-ca-cert-hash {HASH}\n"
        );

        let artifacts = parse_init_output(&output);
        assert_eq!(artifacts.token, TOKEN);
        assert_eq!(artifacts.ca_cert_hash, HASH);
        assert_eq!(artifacts.join_command, join_line());
    }

    #[test]
    fn test_parse_init_output_fallback_stops_after_three_continuations() {
        let output = format!(
            "kubeadm join 10.0.0.5:6443 \\\n\
             --control-plane \\\n\
             --certificate-key {CERT_KEY} \\\n\
             --token {TOKEN} \\\n\
             --discovery-token-ca-cert-hash {HASH}\n"
        );

        let artifacts = parse_init_output(&output);
        assert_eq!(artifacts.token, TOKEN);
        assert_eq!(artifacts.certificate_key.as_deref(), Some(CERT_KEY));
        assert!(
            artifacts.ca_cert_hash.is_empty(),
            "fourth continuation line must not be consumed"
        );
    }

    #[test]
    fn test_parse_init_output_marker_without_join_falls_back() {
        let output = format!("{}\n{JOIN_MARKER}\nfailed to create token\n", join_line());
        let artifacts = parse_init_output(&output);
        assert_eq!(artifacts.token, TOKEN);
    }

    #[test]
    fn test_parse_init_output_without_join_is_empty() {
        let artifacts = parse_init_output("[init] something went sideways\n");
        assert_eq!(artifacts, JoinArtifacts::default());
    }

    #[test]
    fn test_certificate_key_requires_hex() {
        let output = format!("{JOIN_MARKER}\n{}\n{CERT_KEY_MARKER} \n", join_line());
        assert!(parse_init_output(&output).certificate_key.is_none());
    }
}
