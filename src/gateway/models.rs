//! Records mirrored 1:1 from the hosted tables, plus their insert and patch shapes.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A collection stored in its own table and managed through the admin panel.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Insert shape (no id, no timestamps).
    type New: Serialize + Send + Sync;
    /// Sparse update shape; `None` fields are left out of the request.
    type Patch: Serialize + Default + Send + Sync;

    const TABLE: &'static str;
    const LABEL: &'static str;

    fn id(&self) -> i64;

    /// Served when the collection cannot be loaded.
    fn fallback() -> Vec<Self> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tech: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub tech: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tech: Option<Vec<String>>,
    /// `Some(None)` clears the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
}

impl Resource for Project {
    type New = NewProject;
    type Patch = ProjectPatch;

    const TABLE: &'static str = "projects";
    const LABEL: &'static str = "project";

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testimonial {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTestimonial {
    pub name: String,
    pub role: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestimonialPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

impl Resource for Testimonial {
    type New = NewTestimonial;
    type Patch = TestimonialPatch;

    const TABLE: &'static str = "testimonials";
    const LABEL: &'static str = "testimonial";

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Talk {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTalk {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TalkPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
}

impl Resource for Talk {
    type New = NewTalk;
    type Patch = TalkPatch;

    const TABLE: &'static str = "talks";
    const LABEL: &'static str = "talk";

    fn id(&self) -> i64 {
        self.id
    }
}

/// Table holding the single settings row.
pub const SETTINGS_TABLE: &str = "site_settings";
/// The settings row always lives at this id.
pub const SETTINGS_ID: i64 = 1;

/// Site-wide copy read by nearly every public section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSettings {
    pub id: i64,
    pub site_title: String,
    pub site_description: String,
    pub hero_title: String,
    pub hero_subtitle: String,
    pub about_text: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ID,
            site_title: "DevIem".to_string(),
            site_description: "Full stack developer, speaker and tutor".to_string(),
            hero_title: "Hi, I'm DevIem".to_string(),
            hero_subtitle: "I build fast, accessible web applications".to_string(),
            about_text: "I design and ship web products end to end, and I teach others to do the same."
                .to_string(),
            skills: ["TypeScript", "React", "Node.js", "PostgreSQL", "Rust"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            profile_image_url: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hero_subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<Option<String>>,
}
