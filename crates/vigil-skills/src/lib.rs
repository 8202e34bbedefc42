//! Skill discovery and rendering.
//!
//! A skill is a directory containing a `SKILL.md` file: YAML frontmatter
//! (`name`, `description`, `allowed_tools`, `model`) followed by the prompt
//! body. Skills are discovered from a project-local root and a user-global
//! root; the project shadows the global on a name collision. The registry is
//! immutable between explicit `reload` calls.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_types::{ModelTier, Result, VigilError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLocation {
    Project,
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelTier>,
    pub location: SkillLocation,
    pub path: PathBuf,
    pub body: String,
}

impl Skill {
    /// Substitute `$ARGUMENTS` in the body, leaving surrounding content
    /// untouched. A body without the placeholder is returned as-is.
    pub fn render(&self, arguments: &str) -> String {
        self.body.replace("$ARGUMENTS", arguments)
    }
}

#[derive(Debug, Deserialize)]
struct Frontmatter {
    name: String,
    description: String,
    #[serde(default)]
    allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    model: Option<ModelTier>,
}

/// Skill registry over a project root and a user-global root.
pub struct SkillRegistry {
    project_root: Option<PathBuf>,
    global_root: PathBuf,
    skills: RwLock<HashMap<String, Skill>>,
}

impl SkillRegistry {
    pub fn for_workspace(project_root: Option<PathBuf>) -> Result<Self> {
        Self::with_roots(project_root, default_global_root())
    }

    pub fn with_roots(project_root: Option<PathBuf>, global_root: PathBuf) -> Result<Self> {
        let registry = Self {
            project_root,
            global_root,
            skills: RwLock::new(HashMap::new()),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Rescan both roots. Project entries win on name collision.
    pub fn reload(&self) -> Result<()> {
        let mut found = HashMap::new();
        for (root, location) in self.roots() {
            if !root.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let skill_file = entry.path().join("SKILL.md");
                if !skill_file.exists() {
                    continue;
                }
                let content = match std::fs::read_to_string(&skill_file) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(path = %skill_file.display(), "unreadable skill: {e}");
                        continue;
                    }
                };
                let skill = match parse_skill(&content, location, entry.path()) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(path = %skill_file.display(), "skipping bad skill: {e}");
                        continue;
                    }
                };
                // First root wins: project shadows global.
                found.entry(skill.name.clone()).or_insert(skill);
            }
        }
        debug!(count = found.len(), "skill registry loaded");
        *self.skills.write() = found;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Skill> {
        self.skills
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VigilError::SkillNotFound(name.to_string()))
    }

    pub fn get_all(&self) -> Vec<Skill> {
        let mut all: Vec<Skill> = self.skills.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn exists(&self, name: &str) -> bool {
        self.skills.read().contains_key(name)
    }

    /// Render a skill body with the caller's prompt substituted for
    /// `$ARGUMENTS`.
    pub fn render(&self, name: &str, arguments: &str) -> Result<String> {
        Ok(self.get(name)?.render(arguments))
    }

    fn roots(&self) -> Vec<(PathBuf, SkillLocation)> {
        let mut roots = Vec::new();
        if let Some(project) = &self.project_root {
            roots.push((project.join(".vigil").join("skills"), SkillLocation::Project));
        }
        roots.push((self.global_root.clone(), SkillLocation::Global));
        roots
    }
}

fn default_global_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".vigil").join("skills"))
        .unwrap_or_else(|| PathBuf::from(".vigil-global-skills"))
}

fn parse_skill(content: &str, location: SkillLocation, dir: PathBuf) -> Result<Skill> {
    let (frontmatter, body) = split_frontmatter(content)?;
    validate_skill_name(&frontmatter.name)?;
    Ok(Skill {
        name: frontmatter.name,
        description: frontmatter.description,
        allowed_tools: frontmatter.allowed_tools.unwrap_or_default(),
        model: frontmatter.model,
        location,
        path: dir,
        body,
    })
}

fn split_frontmatter(content: &str) -> Result<(Frontmatter, String)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut bounds = None;
    let mut start = None;
    for (i, line) in lines.iter().enumerate() {
        if line.trim() == "---" {
            match start {
                None => start = Some(i),
                Some(s) => {
                    bounds = Some((s, i));
                    break;
                }
            }
        }
    }
    let Some((start, end)) = bounds else {
        return Err(VigilError::Validation {
            task: None,
            reason: "skill file is missing its frontmatter".into(),
        });
    };
    let yaml = lines[start + 1..end].join("\n");
    let frontmatter: Frontmatter = serde_yaml::from_str(&yaml)?;
    let body = if end + 1 < lines.len() {
        lines[end + 1..].join("\n")
    } else {
        String::new()
    };
    Ok((frontmatter, body))
}

fn validate_skill_name(name: &str) -> Result<()> {
    let bad = |reason: &str| {
        Err(VigilError::Validation {
            task: None,
            reason: format!("skill name '{name}': {reason}"),
        })
    };
    if name.is_empty() || name.len() > 64 {
        return bad("must be 1-64 characters");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return bad("cannot start or end with a hyphen");
    }
    let mut prev_hyphen = false;
    for c in name.chars() {
        if c == '-' {
            if prev_hyphen {
                return bad("cannot contain consecutive hyphens");
            }
            prev_hyphen = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_hyphen = false;
        } else {
            return bad("must be lowercase alphanumeric with hyphens");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn sample_skill(name: &str, description: &str, body: &str) -> String {
        format!(
            "---\nname: {name}\ndescription: {description}\nallowed_tools:\n  - Read\n  - Bash\n---\n{body}\n"
        )
    }

    fn write_skill(root: &Path, name: &str, content: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), content).unwrap();
    }

    fn registry(tmp: &TempDir) -> SkillRegistry {
        let workspace = tmp.path().join("workspace");
        let global = tmp.path().join("global");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::create_dir_all(&global).unwrap();
        SkillRegistry::with_roots(Some(workspace), global).unwrap()
    }

    #[test]
    fn discovers_from_both_roots() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        write_skill(
            &tmp.path().join("workspace").join(".vigil").join("skills"),
            "proj-skill",
            &sample_skill("proj-skill", "from project", "body"),
        );
        write_skill(
            &tmp.path().join("global"),
            "global-skill",
            &sample_skill("global-skill", "from global", "body"),
        );
        registry.reload().unwrap();

        assert!(registry.exists("proj-skill"));
        assert!(registry.exists("global-skill"));
        assert_eq!(registry.get_all().len(), 2);
        let skill = registry.get("proj-skill").unwrap();
        assert_eq!(skill.allowed_tools, vec!["Read", "Bash"]);
    }

    #[test]
    fn project_shadows_global() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        write_skill(
            &tmp.path().join("workspace").join(".vigil").join("skills"),
            "dup",
            &sample_skill("dup", "project version", "body"),
        );
        write_skill(
            &tmp.path().join("global"),
            "dup",
            &sample_skill("dup", "global version", "body"),
        );
        registry.reload().unwrap();

        let skill = registry.get("dup").unwrap();
        assert_eq!(skill.description, "project version");
        assert_eq!(skill.location, SkillLocation::Project);
    }

    #[test]
    fn render_substitutes_arguments() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        write_skill(
            &tmp.path().join("global"),
            "report",
            &sample_skill("report", "daily report", "Write a report about: $ARGUMENTS\nKeep it short."),
        );
        registry.reload().unwrap();

        let rendered = registry.render("report", "open pull requests").unwrap();
        assert_eq!(rendered, "Write a report about: open pull requests\nKeep it short.");
    }

    #[test]
    fn missing_skill_is_a_typed_error() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        assert!(matches!(
            registry.get("nope"),
            Err(VigilError::SkillNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn malformed_skills_are_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp);
        write_skill(&tmp.path().join("global"), "broken", "no frontmatter here");
        write_skill(
            &tmp.path().join("global"),
            "ok",
            &sample_skill("ok", "fine", "body"),
        );
        registry.reload().unwrap();
        assert!(!registry.exists("broken"));
        assert!(registry.exists("ok"));
    }

    #[test]
    fn skill_names_are_validated() {
        assert!(validate_skill_name("good-name-2").is_ok());
        assert!(validate_skill_name("Bad").is_err());
        assert!(validate_skill_name("-lead").is_err());
        assert!(validate_skill_name("trail-").is_err());
        assert!(validate_skill_name("a--b").is_err());
        assert!(validate_skill_name("").is_err());
    }
}
