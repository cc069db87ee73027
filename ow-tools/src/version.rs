//! Semantic version bump decisions over a commit range.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Conventional-commit header: `type(scope)!: subject`.
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<type>[A-Za-z]+)(?:\([^)]*\))?(?P<bang>!)?:\s*(?P<subject>.*)$")
        .expect("header regex")
});

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<v>v?)(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)(?:-[\w.]+)?$")
        .expect("semver regex")
});

/// Commit types that never produce a release note.
const QUIET_TYPES: &[&str] = &["chore", "ci", "test", "style", "build", "release"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
}

impl Commit {
    pub fn header(&self) -> &str {
        self.message.lines().next().unwrap_or_default().trim()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BumpKind {
    Patch,
    Minor,
    Major,
}

impl BumpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::Minor => "minor",
            Self::Major => "major",
        }
    }
}

impl fmt::Display for BumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_commit(message: &str) -> BumpKind {
    if message.contains("BREAKING CHANGE") || message.contains("BREAKING-CHANGE") {
        return BumpKind::Major;
    }
    let header = message.lines().next().unwrap_or_default().trim();
    let Some(caps) = HEADER_RE.captures(header) else {
        return BumpKind::Patch;
    };
    if caps.name("bang").is_some() {
        return BumpKind::Major;
    }
    if caps["type"].eq_ignore_ascii_case("feat") {
        return BumpKind::Minor;
    }
    BumpKind::Patch
}

/// `None` means there is nothing to release.
pub fn decide_bump(commits: &[Commit]) -> Option<BumpKind> {
    commits.iter().map(|c| classify_commit(&c.message)).max()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVersion(pub String);

impl fmt::Display for InvalidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a semantic version: {:?}", self.0)
    }
}

impl std::error::Error for InvalidVersion {}

/// A leading `v` is kept; any pre-release suffix is dropped.
pub fn bump_version(current: &str, kind: BumpKind) -> Result<String, InvalidVersion> {
    let caps = SEMVER_RE
        .captures(current.trim())
        .ok_or_else(|| InvalidVersion(current.to_string()))?;
    let part = |name: &str| {
        caps[name]
            .parse::<u64>()
            .map_err(|_| InvalidVersion(current.to_string()))
    };
    let (major, minor, patch) = (part("major")?, part("minor")?, part("patch")?);
    let bumped = match kind {
        BumpKind::Major => major.checked_add(1).map(|m| (m, 0, 0)),
        BumpKind::Minor => minor.checked_add(1).map(|m| (major, m, 0)),
        BumpKind::Patch => patch.checked_add(1).map(|p| (major, minor, p)),
    };
    let (major, minor, patch) = bumped.ok_or_else(|| InvalidVersion(current.to_string()))?;
    Ok(format!("{}{major}.{minor}.{patch}", &caps["v"]))
}

/// Computed once from a commit snapshot and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePlan {
    pub version: String,
    pub bump: BumpKind,
    pub notes: Vec<String>,
}

impl fmt::Display for ReleasePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version: {} ({} bump)", self.version, self.bump)?;
        writeln!(f, "Notes:")?;
        for note in &self.notes {
            writeln!(f, "- {note}")?;
        }
        Ok(())
    }
}

/// `Ok(None)` when the range is empty.
pub fn plan_release(current: &str, commits: &[Commit]) -> Result<Option<ReleasePlan>, InvalidVersion> {
    let Some(bump) = decide_bump(commits) else {
        return Ok(None);
    };
    let version = bump_version(current, bump)?;
    let notes = commits.iter().filter_map(release_note).collect();
    Ok(Some(ReleasePlan {
        version,
        bump,
        notes,
    }))
}

fn release_note(commit: &Commit) -> Option<String> {
    let header = commit.header();
    if header.is_empty() || header.starts_with("Merge ") || header.starts_with("Revert ") {
        return None;
    }
    let subject = match HEADER_RE.captures(header) {
        Some(caps) => {
            let kind = caps["type"].to_ascii_lowercase();
            if QUIET_TYPES.contains(&kind.as_str()) {
                return None;
            }
            caps["subject"].trim().to_string()
        }
        None => header.to_string(),
    };
    if subject.is_empty() {
        return None;
    }
    let mut chars = subject.chars();
    let subject = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => subject,
    };
    if commit.author.is_empty() {
        Some(subject)
    } else {
        Some(format!("{subject} @{}", commit.author))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commits(messages: &[&str]) -> Vec<Commit> {
        messages
            .iter()
            .enumerate()
            .map(|(i, m)| Commit {
                sha: format!("{i:07}"),
                message: m.to_string(),
                author: "ada".to_string(),
            })
            .collect()
    }

    #[test]
    fn aggregate_takes_highest_class() {
        assert_eq!(decide_bump(&commits(&["fix: x", "feat: y"])), Some(BumpKind::Minor));
        assert_eq!(decide_bump(&commits(&["feat!: x"])), Some(BumpKind::Major));
        assert_eq!(decide_bump(&commits(&["chore: x"])), Some(BumpKind::Patch));
        assert_eq!(decide_bump(&[]), None);
    }

    #[test]
    fn breaking_markers_are_major() {
        assert_eq!(classify_commit("fix(api)!: drop v1"), BumpKind::Major);
        assert_eq!(
            classify_commit("refactor: tidy\n\nBREAKING CHANGE: config moved"),
            BumpKind::Major
        );
        assert_eq!(classify_commit("feat(cli): add flag"), BumpKind::Minor);
        assert_eq!(classify_commit("featuring nothing"), BumpKind::Patch);
    }

    #[test]
    fn bumps_reset_lower_components() {
        assert_eq!(bump_version("1.2.3", BumpKind::Major).unwrap(), "2.0.0");
        assert_eq!(bump_version("1.2.3", BumpKind::Minor).unwrap(), "1.3.0");
        assert_eq!(bump_version("1.2.3", BumpKind::Patch).unwrap(), "1.2.4");
        assert_eq!(bump_version("v0.9.1-rc.1", BumpKind::Patch).unwrap(), "v0.9.2");
        assert!(bump_version("latest", BumpKind::Patch).is_err());
    }

    #[test]
    fn component_overflow_is_rejected() {
        let max = u64::MAX;
        assert_eq!(
            bump_version(&format!("{max}.0.0"), BumpKind::Major),
            Err(InvalidVersion(format!("{max}.0.0")))
        );
        assert!(bump_version(&format!("1.{max}.0"), BumpKind::Minor).is_err());
        assert!(bump_version(&format!("v1.2.{max}"), BumpKind::Patch).is_err());
        assert_eq!(bump_version(&format!("{max}.0.0"), BumpKind::Patch).unwrap(), format!("{max}.0.1"));
        let commits = commits(&["feat!: drop v1 api"]);
        assert!(plan_release(&format!("{max}.0.0"), &commits).is_err());
    }

    #[test]
    fn plan_filters_housekeeping_notes() {
        let plan = plan_release(
            "v1.4.0",
            &commits(&[
                "feat: add release ledger",
                "chore: bump version to 1.4.0",
                "Merge pull request #9 from acme/topic",
                "fix(review): keep marker last",
            ]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(plan.version, "v1.5.0");
        assert_eq!(plan.bump, BumpKind::Minor);
        assert_eq!(
            plan.notes,
            vec!["Add release ledger @ada", "Keep marker last @ada"]
        );
        assert_eq!(plan_release("1.0.0", &[]).unwrap(), None);
    }
}
