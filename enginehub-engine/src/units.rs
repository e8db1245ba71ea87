//! Size, CPU and identifier conversions shared by the adapters.

use crate::error::{EngineError, Result};

/// CFS scheduler period used for CPU quotas, in microseconds (100ms).
pub const CPU_PERIOD_US: i64 = 100_000;

/// Parse a human-readable memory limit into bytes.
///
/// Accepts `GB`, `MB` and `KB` suffixes (binary multiples, case-insensitive,
/// fractions allowed) and the short forms `G`, `M`, `K`. A string of plain
/// digits is taken as a byte count unchanged.
pub fn parse_memory_limit(limit: &str) -> Result<u64> {
    let normalized = limit.trim().to_ascii_uppercase();
    let suffixes: [(&str, u64); 7] = [
        ("GB", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("KB", 1024),
        ("G", 1024 * 1024 * 1024),
        ("M", 1024 * 1024),
        ("K", 1024),
        ("B", 1),
    ];

    let (number, multiplier) = suffixes
        .iter()
        .find_map(|(suffix, mult)| normalized.strip_suffix(suffix).map(|n| (n.trim(), *mult)))
        .unwrap_or((normalized.as_str(), 1));

    if number.is_empty() {
        return Err(invalid_memory(limit));
    }

    if multiplier == 1 {
        return number.parse::<u64>().map_err(|_| invalid_memory(limit));
    }

    let value: f64 = number.parse().map_err(|_| invalid_memory(limit))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid_memory(limit));
    }
    Ok((value * multiplier as f64) as u64)
}

fn invalid_memory(limit: &str) -> EngineError {
    EngineError::InvalidConfig(format!("invalid memory limit '{}'", limit))
}

/// Quota/period pair for a fractional core count.
///
/// The core count must be finite and positive.
pub fn cpu_quota(engine: &str, cores: f64) -> Result<(i64, i64)> {
    if !cores.is_finite() || cores <= 0.0 {
        return Err(EngineError::translation(
            engine,
            format!("cpu limit must be a positive number of cores, got {}", cores),
        ));
    }
    let quota = (cores * CPU_PERIOD_US as f64).round();
    if quota < 1.0 || quota > i64::MAX as f64 {
        return Err(EngineError::translation(engine, format!("cpu limit {} is out of range", cores)));
    }
    Ok((quota as i64, CPU_PERIOD_US))
}

/// Size in the `"{:.1}MB"` display form.
pub fn format_size(bytes: u64) -> String {
    format!("{:.1}MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Canonical short image id: digest prefix stripped, 12 characters.
pub fn short_id(id: &str) -> String {
    let id = id.split_once(':').map_or(id, |(_, digest)| digest);
    id.chars().take(12).collect()
}

/// Split `registry:5000/repo/name:tag` into repository and tag.
///
/// The tag separator is the last `:` after the last `/`; references without
/// one get `latest`.
pub fn split_image_reference(reference: &str) -> (String, String) {
    let reference = reference.split('@').next().unwrap_or(reference);
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (reference[..split].to_string(), reference[split + 1..].to_string())
        }
        None => (reference.to_string(), "latest".to_string()),
    }
}

/// Split a command line into argv with POSIX shell quoting rules.
///
/// Unbalanced quotes and empty commands are translation errors.
pub fn split_command(engine: &str, command: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(command)
        .map_err(|e| EngineError::translation(engine, format!("cannot parse command `{}`: {}", command, e)))?;
    if argv.is_empty() {
        return Err(EngineError::translation(engine, "empty command"));
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("2GB").unwrap(), 2_147_483_648);
        assert_eq!(parse_memory_limit("512MB").unwrap(), 536_870_912);
        assert_eq!(parse_memory_limit("512mb").unwrap(), 536_870_912);
        assert_eq!(parse_memory_limit("64KB").unwrap(), 65_536);
        assert_eq!(parse_memory_limit("1.5GB").unwrap(), 1_610_612_736);
        assert_eq!(parse_memory_limit("256m").unwrap(), 268_435_456);
        assert_eq!(parse_memory_limit("1048576").unwrap(), 1_048_576);
        assert!(parse_memory_limit("lots").is_err());
        assert!(parse_memory_limit("MB").is_err());
        assert!(parse_memory_limit("").is_err());
    }

    #[test]
    fn test_parse_memory_limit_is_idempotent_on_bytes() {
        let bytes = parse_memory_limit("512MB").unwrap();
        assert_eq!(parse_memory_limit(&bytes.to_string()).unwrap(), bytes);
    }

    #[test]
    fn test_cpu_quota() {
        assert_eq!(cpu_quota("docker", 1.5).unwrap(), (150_000, 100_000));
        assert_eq!(cpu_quota("docker", 0.25).unwrap(), (25_000, 100_000));
        assert_eq!(cpu_quota("docker", 2.0).unwrap(), (200_000, 100_000));
    }

    #[test]
    fn test_cpu_quota_rejects_unusable_core_counts() {
        for cores in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e-9, 1e300] {
            assert!(
                matches!(cpu_quota("podman", cores), Err(EngineError::Translation { .. })),
                "accepted {}",
                cores
            );
        }
    }

    #[test]
    fn test_split_command_honours_quotes() {
        assert_eq!(
            split_command("docker", "sh -c 'echo hi; exit 3'").unwrap(),
            vec!["sh", "-c", "echo hi; exit 3"]
        );
        assert_eq!(
            split_command("docker", r#"grep -r "two words" /etc"#).unwrap(),
            vec!["grep", "-r", "two words", "/etc"]
        );
        assert_eq!(
            split_command("docker", r"touch my\ file").unwrap(),
            vec!["touch", "my file"]
        );
        assert_eq!(split_command("docker", "  ls   -la ").unwrap(), vec!["ls", "-la"]);
    }

    #[test]
    fn test_split_command_rejects_unbalanced_and_empty_input() {
        assert!(matches!(
            split_command("lxc", "sh -c 'echo hi"),
            Err(EngineError::Translation { .. })
        ));
        assert!(matches!(
            split_command("lxc", r#"echo "open"#),
            Err(EngineError::Translation { .. })
        ));
        assert!(matches!(split_command("lxc", "   "), Err(EngineError::Translation { .. })));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0MB");
        assert_eq!(format_size(75_917_312), "72.4MB");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("sha256:0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("nginx:1.25"), ("nginx".into(), "1.25".into()));
        assert_eq!(split_image_reference("nginx"), ("nginx".into(), "latest".into()));
        assert_eq!(
            split_image_reference("registry.local:5000/team/app:v2"),
            ("registry.local:5000/team/app".into(), "v2".into())
        );
        assert_eq!(
            split_image_reference("registry.local:5000/team/app"),
            ("registry.local:5000/team/app".into(), "latest".into())
        );
    }
}
