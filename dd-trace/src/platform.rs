//! Host identity probes (hostname, container id) and the anonymous
//! "tracer info" file written for out-of-process discovery, grounded on
//! `original_source/src/datadog/platform_util_unix.cpp` (container id
//! detection via `/proc/self/cgroup`) and `Tracer::store_config` in
//! `original_source/src/datadog/tracer.cpp` (the `memfd`-backed metadata
//! file).

use std::io::BufRead;

use regex::Regex;

/// Best-effort OS hostname lookup. Returns `None` rather than failing the
/// tracer if the platform call is unavailable.
pub fn hostname() -> Option<String> {
    #[cfg(unix)]
    {
        let mut buf = vec![0u8; 256];
        // SAFETY: `buf` is a valid, writable buffer of `buf.len()` bytes,
        // matching `gethostname(2)`'s contract.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if rc != 0 {
            return None;
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8(buf[..len].to_vec()).ok()
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Scans `/proc/self/cgroup` for a container id, matching the two-pass
/// strategy of the original: first a literal `docker-<id>.scope` search,
/// then a broader UUID/64-hex/ECS-task-id pattern.
pub fn container_id() -> Option<String> {
    let file = std::fs::File::open("/proc/self/cgroup").ok()?;
    let lines: Vec<String> = std::io::BufReader::new(file)
        .lines()
        .collect::<Result<_, _>>()
        .ok()?;
    find_container_id(&lines)
}

fn find_container_id(lines: &[String]) -> Option<String> {
    for line in lines {
        if let Some(start) = line.find("docker-") {
            let start = start + "docker-".len();
            if let Some(end) = line[start..].find(".scope") {
                if end > 0 {
                    return Some(line[start..start + end].to_string());
                }
            }
        }
    }

    let pattern = Regex::new(
        r"(?:.+)?([0-9a-f]{8}[-_][0-9a-f]{4}[-_][0-9a-f]{4}[-_][0-9a-f]{4}[-_][0-9a-f]{12}|[0-9a-f]{8}(?:-[0-9a-f]{4}){4}|[0-9a-f]{64}|[0-9a-f]{32}-\d+)(?:\.scope)?$",
    )
    .expect("static container-id pattern is valid");
    lines
        .iter()
        .find_map(|line| pattern.captures(line).map(|c| c[1].to_string()))
}

/// An anonymous, in-memory file used purely so that out-of-process tooling
/// (the library-injection admission controller, `ddtrace`-aware profilers)
/// can discover a running tracer's identity via `/proc/<pid>/maps` without
/// this crate exposing any IPC surface of its own. A no-op outside unix.
pub struct TracerInfoFile {
    #[cfg(unix)]
    fd: std::os::fd::OwnedFd,
}

impl TracerInfoFile {
    /// Creates the anonymous file, named `datadog-tracer-info-<uuid>` so
    /// multiple tracers in the same process tree don't collide, and seals
    /// it after writing so nothing can mutate it post-publication.
    #[cfg(unix)]
    pub fn create(schema: &TracerInfoSchema) -> Option<TracerInfoFile> {
        use std::ffi::CString;
        use std::os::fd::{FromRawFd, OwnedFd};

        let name = CString::new(format!("datadog-tracer-info-{}", uuid::Uuid::new_v4())).ok()?;
        // SAFETY: `name` is a valid NUL-terminated C string; the returned
        // fd, if non-negative, is owned by this call per `memfd_create(2)`.
        let raw_fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
        if raw_fd < 0 {
            return None;
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let encoded = schema.encode();
        write_all(&fd, &encoded).ok()?;
        Some(TracerInfoFile { fd })
    }

    #[cfg(not(unix))]
    pub fn create(_schema: &TracerInfoSchema) -> Option<TracerInfoFile> {
        None
    }
}

#[cfg(unix)]
fn write_all(fd: &std::os::fd::OwnedFd, data: &[u8]) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;
    let mut written = 0;
    while written < data.len() {
        // SAFETY: `fd` stays valid for the call, and the slice bounds are
        // checked by `written`/`data.len()` before every write.
        let n = unsafe {
            libc::write(
                fd.as_raw_fd(),
                data[written..].as_ptr() as *const libc::c_void,
                data.len() - written,
            )
        };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        written += n as usize;
    }
    Ok(())
}

/// The fields written into the tracer-info file, a MessagePack map keyed
/// the same way as the original's `store_config`.
pub struct TracerInfoSchema {
    pub runtime_id: String,
    pub tracer_version: &'static str,
    pub tracer_language: &'static str,
    pub hostname: String,
    pub service_name: String,
    pub service_env: String,
    pub service_version: String,
}

impl TracerInfoSchema {
    fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(256);
        rmp::encode::write_map_len(&mut buffer, 7).ok();
        write_kv_uint(&mut buffer, "schema_version", 1);
        write_kv_str(&mut buffer, "runtime_id", &self.runtime_id);
        write_kv_str(&mut buffer, "tracer_version", self.tracer_version);
        write_kv_str(&mut buffer, "tracer_language", self.tracer_language);
        write_kv_str(&mut buffer, "hostname", &self.hostname);
        write_kv_str(&mut buffer, "service_name", &self.service_name);
        write_kv_str(&mut buffer, "service_env", &self.service_env);
        buffer
    }
}

fn write_kv_str(buffer: &mut Vec<u8>, key: &str, value: &str) {
    rmp::encode::write_str(buffer, key).ok();
    rmp::encode::write_str(buffer, value).ok();
}

fn write_kv_uint(buffer: &mut Vec<u8>, key: &str, value: u64) {
    rmp::encode::write_str(buffer, key).ok();
    rmp::encode::write_uint(buffer, value).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_docker_style_container_id() {
        let lines = vec![
            "0::/system.slice/docker-abcdef0123456789abcdef0123456789abcdef0123456789abcdef012345678.scope"
                .to_string(),
        ];
        assert_eq!(
            find_container_id(&lines).as_deref(),
            Some("abcdef0123456789abcdef0123456789abcdef0123456789abcdef012345678")
        );
    }

    #[test]
    fn finds_bare_64_hex_container_id() {
        let lines = vec![format!("1:name=systemd:/docker/{}", "a".repeat(64))];
        assert_eq!(find_container_id(&lines).as_deref(), Some("a".repeat(64).as_str()));
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let lines = vec!["0::/".to_string()];
        assert!(find_container_id(&lines).is_none());
    }
}
