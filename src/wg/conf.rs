//! Daemon configuration file mutator
//!
//! The file is parsed into a sequence of sections, each keeping its original
//! lines byte for byte (line endings, comments, blank lines, unknown keys).
//! Mutations operate on whole sections and the file is rendered by plain
//! concatenation, so untouched sections come out exactly as they went in.

use std::path::PathBuf;

use tokio::sync::Mutex;

use super::command::Privileged;
use crate::error::{Error, Result};
use crate::fsutil::write_atomic;

/// Which kind of section a block of lines is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    /// Lines before the first header
    Preamble,
    Interface,
    Peer,
    Other(String),
}

/// One section: its header line (if any) and every line up to the next header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Raw lines, each including its line terminator
    pub lines: Vec<String>,
}

impl Section {
    fn peer(public_key: &str, allowed_ip: &str) -> Self {
        Self {
            kind: SectionKind::Peer,
            lines: vec![
                "[Peer]\n".to_string(),
                format!("PublicKey = {}\n", public_key),
                format!("AllowedIPs = {}\n", allowed_ip),
            ],
        }
    }

    /// Value of the first `key = value` line, matching the key case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (k, v) = parse_assignment(line)?;
            k.eq_ignore_ascii_case(key).then_some(v)
        })
    }

    pub fn public_key(&self) -> Option<&str> {
        self.get("PublicKey")
    }

    fn set(&mut self, key: &str, value: &str) {
        for line in self.lines.iter_mut() {
            let matched = parse_assignment(line)
                .filter(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(k, _)| k.to_string());
            if let Some(k) = matched {
                let ending = line_ending(line);
                *line = format!("{} = {}{}", k, value, ending);
                return;
            }
        }
        self.lines.push(format!("{} = {}\n", key, value));
    }

    fn ends_with_blank_line(&self) -> bool {
        self.lines.last().map_or(false, |l| l.trim().is_empty())
    }
}

/// Parsed daemon config file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgConf {
    sections: Vec<Section>,
}

impl WgConf {
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for line in text.split_inclusive('\n') {
            if let Some(name) = header_name(line) {
                let kind = if name.eq_ignore_ascii_case("Interface") {
                    SectionKind::Interface
                } else if name.eq_ignore_ascii_case("Peer") {
                    SectionKind::Peer
                } else {
                    SectionKind::Other(name.to_string())
                };
                sections.push(Section { kind, lines: vec![line.to_string()] });
                continue;
            }

            match sections.last_mut() {
                Some(section) => section.lines.push(line.to_string()),
                None => sections.push(Section {
                    kind: SectionKind::Preamble,
                    lines: vec![line.to_string()],
                }),
            }
        }

        Self { sections }
    }

    pub fn render(&self) -> String {
        self.sections
            .iter()
            .flat_map(|s| s.lines.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn peers(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.kind == SectionKind::Peer)
    }

    pub fn has_peer(&self, public_key: &str) -> bool {
        self.peers().any(|s| s.public_key() == Some(public_key))
    }

    /// Append a peer block, or update AllowedIPs of an existing block with the same key.
    ///
    /// Returns `true` when a new block was appended.
    pub fn add_peer(&mut self, public_key: &str, allowed_ip: &str) -> bool {
        if let Some(existing) = self
            .sections
            .iter_mut()
            .find(|s| s.kind == SectionKind::Peer && s.public_key() == Some(public_key))
        {
            if existing.get("AllowedIPs") != Some(allowed_ip) {
                existing.set("AllowedIPs", allowed_ip);
            }
            return false;
        }

        if let Some(last) = self.sections.last_mut() {
            if let Some(line) = last.lines.last_mut() {
                if !line.ends_with('\n') {
                    line.push('\n');
                }
            }
            if !last.ends_with_blank_line() {
                last.lines.push("\n".to_string());
            }
        }
        self.sections.push(Section::peer(public_key, allowed_ip));
        true
    }

    /// Drop every peer block whose PublicKey matches; returns how many were dropped
    pub fn remove_peer(&mut self, public_key: &str) -> usize {
        let before = self.sections.len();
        self.sections
            .retain(|s| !(s.kind == SectionKind::Peer && s.public_key() == Some(public_key)));
        before - self.sections.len()
    }
}

fn header_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn parse_assignment(line: &str) -> Option<(&str, &str)> {
    let content = line.split('#').next()?;
    let (key, value) = content.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// The daemon config file on disk.
///
/// The file belongs to root; with `use_sudo` it is read with `cat` and
/// replaced with `install`/`tee`/`mv` through sudo. Add and remove are
/// serialized within this process.
pub struct ConfFile {
    path: PathBuf,
    privileged: Privileged,
    use_sudo: bool,
    lock: Mutex<()>,
}

impl ConfFile {
    pub fn new(path: PathBuf, privileged: Privileged, use_sudo: bool) -> Self {
        Self {
            path,
            privileged,
            use_sudo,
            lock: Mutex::new(()),
        }
    }

    pub async fn read(&self) -> Result<WgConf> {
        let text = if self.use_sudo {
            self.privileged.run("cat", &[&self.path_str()?], None).await?
        } else {
            tokio::fs::read_to_string(&self.path).await?
        };
        Ok(WgConf::parse(&text))
    }

    /// Persist a peer block
    pub async fn add_peer(&self, public_key: &str, allowed_ip: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut conf = self.read().await?;
        let appended = conf.add_peer(public_key, allowed_ip);
        self.write(&conf).await?;
        tracing::info!(
            path = ?self.path,
            public_key,
            allowed_ip,
            appended,
            "Peer persisted to config"
        );
        Ok(())
    }

    /// Remove a peer block; returns whether anything was removed
    pub async fn remove_peer(&self, public_key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut conf = self.read().await?;
        let removed = conf.remove_peer(public_key);
        if removed == 0 {
            tracing::debug!(path = ?self.path, public_key, "No peer block to remove");
            return Ok(false);
        }
        self.write(&conf).await?;
        tracing::info!(path = ?self.path, public_key, removed, "Peer removed from config");
        Ok(true)
    }

    async fn write(&self, conf: &WgConf) -> Result<()> {
        let text = conf.render();
        if self.use_sudo {
            let target = self.path_str()?;
            let tmp = format!("{}.aegis.tmp", target);
            // create the temp file 0600 first; tee keeps its mode
            self.privileged.run("install", &["-m", "600", "/dev/null", &tmp], None).await?;
            self.privileged.run("tee", &[&tmp], Some(&text)).await?;
            self.privileged.run("mv", &["-f", &tmp, &target], None).await?;
            Ok(())
        } else {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || write_atomic(&path, text.as_bytes()))
                .await
                .map_err(|e| Error::Internal(format!("config writer panicked: {}", e)))?
        }
    }

    fn path_str(&self) -> Result<String> {
        self.path
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Config(format!("non UTF-8 config path {:?}", self.path)))
    }
}
