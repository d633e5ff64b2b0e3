use std::process::Command;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Daemon, HistoryEntry, ImageInspect, ImageSummary, MISSING};
use crate::error::{Error, Result};

/// Docker prints this for absent repository, tag and digest columns.
const NONE: &str = "<none>";

// --- Docker CLI JSON output ---

#[derive(Deserialize)]
struct ImageLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Repository", default)]
    repository: String,
    #[serde(rename = "Tag", default)]
    tag: String,
    #[serde(rename = "Digest", default)]
    digest: String,
}

#[derive(Deserialize)]
struct DockerInspect {
    #[serde(rename = "RootFS")]
    rootfs: InspectRootFS,
}

#[derive(Deserialize)]
struct InspectRootFS {
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

#[derive(Deserialize)]
struct HistoryLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
    #[serde(rename = "CreatedBy", default)]
    created_by: String,
    #[serde(rename = "Size", default)]
    size: String,
}

/// Talks to the daemon through the `docker` CLI.
pub struct DockerCli {
    cmd: String,
}

impl DockerCli {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", self.cmd, args.join(" "));
        debug!(%command, "running docker");
        let output = Command::new(&self.cmd)
            .args(args)
            .output()
            .map_err(|e| Error::Collaborator {
                command: command.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Collaborator {
                command,
                message: stderr.trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Daemon for DockerCli {
    fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let out = self.run(&[
            "image",
            "ls",
            "--all",
            "--digests",
            "--no-trunc",
            "--format",
            "{{json .}}",
        ])?;
        parse_image_list(&out)
    }

    fn inspect_image(&self, id: &str) -> Result<ImageInspect> {
        let out = self.run(&["image", "inspect", id, "--format", "{{json .}}"])?;
        parse_inspect(&out)
    }

    fn image_history(&self, id: &str) -> Result<Vec<HistoryEntry>> {
        let out = self.run(&[
            "image",
            "history",
            id,
            "--no-trunc",
            "--human=false",
            "--format",
            "{{json .}}",
        ])?;
        parse_history(&out)
    }
}

fn json_lines<T: DeserializeOwned>(out: &str, what: &str) -> Result<Vec<T>> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|source| Error::Parse {
                what: format!("{what} line: {line}"),
                source,
            })
        })
        .collect()
}

/// `docker image ls` prints one line per (repository, tag, digest); fold them
/// into one summary per image id, keeping first-seen order.
fn parse_image_list(out: &str) -> Result<Vec<ImageSummary>> {
    let lines: Vec<ImageLine> = json_lines(out, "image list")?;
    let mut images: Vec<ImageSummary> = Vec::new();

    for line in lines {
        let idx = match images.iter().position(|i| i.id == line.id) {
            Some(idx) => idx,
            None => {
                images.push(ImageSummary {
                    id: line.id.clone(),
                    ..Default::default()
                });
                images.len() - 1
            }
        };
        let image = &mut images[idx];

        if line.repository.is_empty() || line.repository == NONE {
            continue;
        }
        if !line.tag.is_empty() && line.tag != NONE {
            let tagged = format!("{}:{}", line.repository, line.tag);
            if !image.repo_tags.contains(&tagged) {
                image.repo_tags.push(tagged);
            }
        }
        if !line.digest.is_empty() && line.digest != NONE {
            let digested = format!("{}@{}", line.repository, line.digest);
            if !image.repo_digests.contains(&digested) {
                image.repo_digests.push(digested);
            }
        }
    }

    Ok(images)
}

fn parse_inspect(out: &str) -> Result<ImageInspect> {
    let di: DockerInspect = serde_json::from_str(out.trim()).map_err(|source| Error::Parse {
        what: "docker inspect JSON".into(),
        source,
    })?;
    Ok(ImageInspect {
        diff_ids: di.rootfs.layers,
    })
}

fn parse_history(out: &str) -> Result<Vec<HistoryEntry>> {
    let lines: Vec<HistoryLine> = json_lines(out, "history")?;
    lines
        .into_iter()
        .map(|line| {
            Ok(HistoryEntry {
                size: parse_docker_size(&line.size)?,
                instruction: (line.id != MISSING).then_some(line.id),
                created_at: line.created_at,
                created_by: line.created_by,
            })
        })
        .collect()
}

/// Parse Docker's size strings: plain bytes (`--human=false`) or
/// human-readable units (e.g. "77.84MB", "0B").
fn parse_docker_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u64>() {
        return Ok(n);
    }
    let invalid = || Error::InvalidSize(s.to_string());
    let unit_start = s.find(|c: char| c.is_alphabetic()).ok_or_else(invalid)?;
    let num: f64 = s[..unit_start].parse().map_err(|_| invalid())?;
    let multiplier = match &s[unit_start..] {
        "B" => 1.0,
        "kB" | "KB" => 1_000.0,
        "MB" => 1_000_000.0,
        "GB" => 1_000_000_000.0,
        "TB" => 1_000_000_000_000.0,
        _ => return Err(invalid()),
    };
    if !num.is_finite() || num < 0.0 {
        return Err(invalid());
    }
    Ok((num * multiplier) as u64)
}
