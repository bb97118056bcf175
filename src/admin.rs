/*!
 * Admin Panel
 * Tabs, edit targets and form handling on top of the content stores
 */
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::auth::users::{UserDirectory, UserError};
use crate::auth::{AuthError, AuthGate};
use crate::gateway::models::{
    NewProject, NewTalk, NewTestimonial, Project, ProjectPatch, SiteSettings, SiteSettingsPatch,
    Talk, TalkPatch, Testimonial, TestimonialPatch,
};
use crate::gateway::storage::ImageStorage;
use crate::gateway::{GatewayError, Remote, ResourceGateway, SettingsGateway};
use crate::sync::{Source, Store, SyncBus};

pub type ProjectStore = Store<ResourceGateway<Project>>;
pub type TestimonialStore = Store<ResourceGateway<Testimonial>>;
pub type TalkStore = Store<ResourceGateway<Talk>>;
pub type SettingsStore = Store<SettingsGateway>;

// ============================================================================
// Content stores
// ============================================================================

/// One store per resource, all on the same bus.
#[derive(Clone)]
pub struct ContentStores {
    pub projects: Arc<ProjectStore>,
    pub testimonials: Arc<TestimonialStore>,
    pub talks: Arc<TalkStore>,
    pub settings: Arc<SettingsStore>,
}

impl ContentStores {
    pub fn new(remote: Remote, bus: SyncBus) -> Self {
        Self {
            projects: Store::new(ResourceGateway::new(remote.clone()), bus.clone()),
            testimonials: Store::new(ResourceGateway::new(remote.clone()), bus.clone()),
            talks: Store::new(ResourceGateway::new(remote.clone()), bus.clone()),
            settings: Store::new(SettingsGateway::new(remote), bus),
        }
    }

    pub async fn mount_all(&self) {
        tokio::join!(
            self.projects.mount(),
            self.testimonials.mount(),
            self.talks.mount(),
            self.settings.mount(),
        );
    }

    pub fn spawn_auto_refresh(&self, every: std::time::Duration) {
        self.projects.spawn_auto_refresh(every);
        self.testimonials.spawn_auto_refresh(every);
        self.talks.spawn_auto_refresh(every);
        self.settings.spawn_auto_refresh(every);
    }
}

// ============================================================================
// Panel state
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Users(#[from] UserError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminTab {
    #[default]
    Dashboard,
    Projects,
    Blog,
    Testimonials,
    Talks,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Projects,
    Testimonials,
    Talks,
}

/// What a form submission turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "id", rename_all = "lowercase")]
pub enum EditTarget {
    New,
    Existing(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PanelView {
    pub active_tab: AdminTab,
    pub editing: BTreeMap<ContentKind, EditTarget>,
}

/// Where the caller should navigate once the panel closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteView {
    Public,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionSummary {
    pub count: usize,
    pub loading: bool,
    pub error: Option<String>,
}

impl SectionSummary {
    fn of<T, S>(store: &Arc<Store<S>>) -> Self
    where
        S: Source<Output = Vec<T>>,
    {
        let state = store.snapshot();
        Self {
            count: state.data.len(),
            loading: state.loading,
            error: state.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub projects: SectionSummary,
    pub testimonials: SectionSummary,
    pub talks: SectionSummary,
    pub settings_error: Option<String>,
    pub users: usize,
}

// ============================================================================
// Forms
// ============================================================================

/// Comma-separated input to a trimmed list without empty entries.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Blank input means the field is absent.
fn optional(input: &str) -> Option<String> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn required(input: &str, field: &str) -> Result<String, AdminError> {
    optional(input).ok_or_else(|| AdminError::Invalid(format!("{} is required", field)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectForm {
    pub title: String,
    pub description: String,
    pub tech: String,
    pub image_url: String,
}

impl ProjectForm {
    pub fn from_record(project: &Project) -> Self {
        Self {
            title: project.title.clone(),
            description: project.description.clone(),
            tech: project.tech.join(", "),
            image_url: project.image_url.clone().unwrap_or_default(),
        }
    }

    fn to_new(&self) -> Result<NewProject, AdminError> {
        Ok(NewProject {
            title: required(&self.title, "Title")?,
            description: required(&self.description, "Description")?,
            tech: split_list(&self.tech),
            image_url: optional(&self.image_url),
        })
    }

    fn to_patch(&self) -> Result<ProjectPatch, AdminError> {
        let new = self.to_new()?;
        Ok(ProjectPatch {
            title: Some(new.title),
            description: Some(new.description),
            tech: Some(new.tech),
            image_url: Some(new.image_url),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestimonialForm {
    pub name: String,
    pub role: String,
    pub text: String,
    pub avatar_url: String,
}

impl TestimonialForm {
    pub fn from_record(testimonial: &Testimonial) -> Self {
        Self {
            name: testimonial.name.clone(),
            role: testimonial.role.clone(),
            text: testimonial.text.clone(),
            avatar_url: testimonial.avatar_url.clone().unwrap_or_default(),
        }
    }

    fn to_new(&self) -> Result<NewTestimonial, AdminError> {
        Ok(NewTestimonial {
            name: required(&self.name, "Name")?,
            role: self.role.trim().to_string(),
            text: required(&self.text, "Text")?,
            avatar_url: optional(&self.avatar_url),
        })
    }

    fn to_patch(&self) -> Result<TestimonialPatch, AdminError> {
        let new = self.to_new()?;
        Ok(TestimonialPatch {
            name: Some(new.name),
            role: Some(new.role),
            text: Some(new.text),
            avatar_url: Some(new.avatar_url),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TalkForm {
    pub title: String,
    pub description: String,
    pub tags: String,
    pub image_url: String,
}

impl TalkForm {
    pub fn from_record(talk: &Talk) -> Self {
        Self {
            title: talk.title.clone(),
            description: talk.description.clone(),
            tags: talk.tags.join(", "),
            image_url: talk.image_url.clone().unwrap_or_default(),
        }
    }

    fn to_new(&self) -> Result<NewTalk, AdminError> {
        Ok(NewTalk {
            title: required(&self.title, "Title")?,
            description: required(&self.description, "Description")?,
            tags: split_list(&self.tags),
            image_url: optional(&self.image_url),
        })
    }

    fn to_patch(&self) -> Result<TalkPatch, AdminError> {
        let new = self.to_new()?;
        Ok(TalkPatch {
            title: Some(new.title),
            description: Some(new.description),
            tags: Some(new.tags),
            image_url: Some(new.image_url),
        })
    }
}

/// Omitted or blank text fields keep their stored value; a blank
/// `profile_image_url` clears the picture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsForm {
    pub site_title: Option<String>,
    pub site_description: Option<String>,
    pub hero_title: Option<String>,
    pub hero_subtitle: Option<String>,
    pub about_text: Option<String>,
    pub skills: Option<String>,
    pub profile_image_url: Option<String>,
}

impl SettingsForm {
    pub fn from_record(settings: &SiteSettings) -> Self {
        Self {
            site_title: Some(settings.site_title.clone()),
            site_description: Some(settings.site_description.clone()),
            hero_title: Some(settings.hero_title.clone()),
            hero_subtitle: Some(settings.hero_subtitle.clone()),
            about_text: Some(settings.about_text.clone()),
            skills: Some(settings.skills.join(", ")),
            profile_image_url: Some(settings.profile_image_url.clone().unwrap_or_default()),
        }
    }

    fn to_patch(&self) -> SiteSettingsPatch {
        let text = |field: &Option<String>| field.as_deref().and_then(optional);
        SiteSettingsPatch {
            site_title: text(&self.site_title),
            site_description: text(&self.site_description),
            hero_title: text(&self.hero_title),
            hero_subtitle: text(&self.hero_subtitle),
            about_text: text(&self.about_text),
            skills: self.skills.as_deref().map(split_list),
            profile_image_url: self.profile_image_url.as_deref().map(optional),
        }
    }
}

// ============================================================================
// Panel
// ============================================================================

pub struct AdminPanel {
    gate: Arc<AuthGate>,
    stores: ContentStores,
    users: Arc<UserDirectory>,
    images: ImageStorage,
    view: Mutex<PanelView>,
}

impl AdminPanel {
    pub fn new(
        gate: Arc<AuthGate>,
        stores: ContentStores,
        users: Arc<UserDirectory>,
        images: ImageStorage,
    ) -> Self {
        Self {
            gate,
            stores,
            users,
            images,
            view: Mutex::new(PanelView::default()),
        }
    }

    pub fn gate(&self) -> &Arc<AuthGate> {
        &self.gate
    }

    pub fn stores(&self) -> &ContentStores {
        &self.stores
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn images(&self) -> &ImageStorage {
        &self.images
    }

    pub fn view(&self) -> PanelView {
        self.lock_view().clone()
    }

    pub fn select_tab(&self, tab: AdminTab) -> PanelView {
        let mut view = self.lock_view();
        view.active_tab = tab;
        view.clone()
    }

    pub fn start_editing(&self, kind: ContentKind, target: EditTarget) -> PanelView {
        let mut view = self.lock_view();
        view.editing.insert(kind, target);
        view.clone()
    }

    pub fn cancel_editing(&self, kind: ContentKind) -> PanelView {
        let mut view = self.lock_view();
        view.editing.remove(&kind);
        view.clone()
    }

    /// The target used when a save does not name one.
    pub fn editing(&self, kind: ContentKind) -> EditTarget {
        self.lock_view()
            .editing
            .get(&kind)
            .copied()
            .unwrap_or(EditTarget::New)
    }

    fn lock_view(&self) -> std::sync::MutexGuard<'_, PanelView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish_editing(&self, kind: ContentKind) {
        self.lock_view().editing.remove(&kind);
    }

    pub async fn save_project(
        &self,
        target: EditTarget,
        form: &ProjectForm,
    ) -> Result<Project, AdminError> {
        let saved = match target {
            EditTarget::New => self.stores.projects.add(&form.to_new()?).await?,
            EditTarget::Existing(id) => self.stores.projects.update(id, &form.to_patch()?).await?,
        };
        self.finish_editing(ContentKind::Projects);
        Ok(saved)
    }

    pub async fn delete_project(&self, id: i64) -> Result<bool, AdminError> {
        Ok(self.stores.projects.remove(id).await?)
    }

    pub async fn save_testimonial(
        &self,
        target: EditTarget,
        form: &TestimonialForm,
    ) -> Result<Testimonial, AdminError> {
        let saved = match target {
            EditTarget::New => self.stores.testimonials.add(&form.to_new()?).await?,
            EditTarget::Existing(id) => {
                self.stores
                    .testimonials
                    .update(id, &form.to_patch()?)
                    .await?
            }
        };
        self.finish_editing(ContentKind::Testimonials);
        Ok(saved)
    }

    pub async fn delete_testimonial(&self, id: i64) -> Result<bool, AdminError> {
        Ok(self.stores.testimonials.remove(id).await?)
    }

    pub async fn save_talk(&self, target: EditTarget, form: &TalkForm) -> Result<Talk, AdminError> {
        let saved = match target {
            EditTarget::New => self.stores.talks.add(&form.to_new()?).await?,
            EditTarget::Existing(id) => self.stores.talks.update(id, &form.to_patch()?).await?,
        };
        self.finish_editing(ContentKind::Talks);
        Ok(saved)
    }

    pub async fn delete_talk(&self, id: i64) -> Result<bool, AdminError> {
        Ok(self.stores.talks.remove(id).await?)
    }

    pub async fn save_settings(&self, form: &SettingsForm) -> Result<SiteSettings, AdminError> {
        Ok(self.stores.settings.update(&form.to_patch()).await?)
    }

    pub fn dashboard(&self) -> Dashboard {
        let users = match self.users.list() {
            Ok(users) => users.len(),
            Err(e) => {
                tracing::warn!("Could not read local users: {}", e);
                0
            }
        };
        Dashboard {
            projects: SectionSummary::of(&self.stores.projects),
            testimonials: SectionSummary::of(&self.stores.testimonials),
            talks: SectionSummary::of(&self.stores.talks),
            settings_error: self.stores.settings.error(),
            users,
        }
    }

    /// Ends the session and resets the panel.
    pub fn logout(&self) -> Result<SiteView, AdminError> {
        self.gate.logout()?;
        *self.lock_view() = PanelView::default();
        Ok(SiteView::Public)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::tests::{test_credential, test_gate};
    use crate::gateway::memory::MemoryTableStore;
    use crate::gateway::models::SETTINGS_TABLE;
    use crate::gateway::storage::MemoryBlobStore;
    use crate::gateway::tests::logged_in_remote;

    pub(crate) async fn panel_with(remote: Remote) -> AdminPanel {
        let gate = remote.gate().clone();
        let stores = ContentStores::new(remote, SyncBus::new());
        stores.mount_all().await;
        let users = UserDirectory::new(gate.storage(), test_credential()).with_cost(4);
        let images = ImageStorage::new(Some(Arc::new(MemoryBlobStore::new())), gate.clone());
        AdminPanel::new(gate, stores, Arc::new(users), images)
    }

    async fn logged_in_panel() -> (AdminPanel, Arc<MemoryTableStore>) {
        let (remote, store) = logged_in_remote().await;
        store.seed_row(
            SETTINGS_TABLE,
            serde_json::to_value(SiteSettings::default()).unwrap(),
        );
        (panel_with(remote).await, store)
    }

    fn project_form(title: &str) -> ProjectForm {
        ProjectForm {
            title: title.to_string(),
            description: "Made with care".to_string(),
            tech: " Rust, axum ,, tokio ".to_string(),
            image_url: "  ".to_string(),
        }
    }

    #[test]
    fn test_split_list_trims_and_drops_blanks() {
        assert_eq!(split_list(" a, b ,,c ,"), vec!["a", "b", "c"]);
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn test_form_blank_optional_is_absent() {
        let new = project_form("X").to_new().unwrap();
        assert_eq!(new.tech, vec!["Rust", "axum", "tokio"]);
        assert!(new.image_url.is_none());

        let patch = project_form("X").to_patch().unwrap();
        assert_eq!(patch.image_url, Some(None));
    }

    #[test]
    fn test_form_requires_title() {
        let result = project_form("   ").to_new();
        assert!(matches!(result, Err(AdminError::Invalid(msg)) if msg == "Title is required"));
    }

    #[test]
    fn test_settings_form_keeps_blank_text_fields() {
        let form = SettingsForm {
            hero_title: Some("Hello".to_string()),
            about_text: Some("   ".to_string()),
            profile_image_url: Some(String::new()),
            ..Default::default()
        };
        let patch = form.to_patch();
        assert_eq!(patch.hero_title.as_deref(), Some("Hello"));
        assert!(patch.about_text.is_none());
        assert!(patch.site_title.is_none());
        assert_eq!(patch.profile_image_url, Some(None));
    }

    #[tokio::test]
    async fn test_save_dispatches_on_edit_target() {
        let (panel, _) = logged_in_panel().await;
        panel.start_editing(ContentKind::Projects, EditTarget::New);

        let created = panel
            .save_project(panel.editing(ContentKind::Projects), &project_form("X"))
            .await
            .unwrap();
        assert!(panel.view().editing.is_empty());

        let mut form = ProjectForm::from_record(&created);
        form.title = "Y".to_string();
        let updated = panel
            .save_project(EditTarget::Existing(created.id), &form)
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "Y");
        let titles: Vec<String> = panel
            .stores()
            .projects
            .data()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Y"]);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_edit_target() {
        let (panel, store) = logged_in_panel().await;
        panel.start_editing(ContentKind::Talks, EditTarget::Existing(9));
        store.set_offline(true);

        let form = TalkForm {
            title: "T".to_string(),
            description: "D".to_string(),
            ..Default::default()
        };
        let result = panel.save_talk(EditTarget::Existing(9), &form).await;

        assert!(matches!(result, Err(AdminError::Gateway(GatewayError::Remote { .. }))));
        assert_eq!(panel.editing(ContentKind::Talks), EditTarget::Existing(9));
    }

    #[tokio::test]
    async fn test_dashboard_counts_and_errors() {
        let (panel, _) = logged_in_panel().await;
        panel
            .save_testimonial(
                EditTarget::New,
                &TestimonialForm {
                    name: "Ada".to_string(),
                    role: "CTO".to_string(),
                    text: "Great mentor".to_string(),
                    avatar_url: String::new(),
                },
            )
            .await
            .unwrap();

        let dashboard = panel.dashboard();
        assert_eq!(dashboard.testimonials.count, 1);
        assert_eq!(dashboard.projects.count, 0);
        assert!(dashboard.projects.error.is_none());
        assert!(dashboard.settings_error.is_none());
        assert_eq!(dashboard.users, 1);
    }

    #[tokio::test]
    async fn test_settings_save_updates_store() {
        let (panel, _) = logged_in_panel().await;
        let saved = panel
            .save_settings(&SettingsForm {
                skills: Some("Rust, Go".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(saved.skills, vec!["Rust", "Go"]);
        assert_eq!(panel.stores().settings.data().skills, vec!["Rust", "Go"]);
    }

    #[tokio::test]
    async fn test_logout_resets_panel_and_blocks_writes() {
        let (panel, store) = logged_in_panel().await;
        panel.select_tab(AdminTab::Talks);
        panel.start_editing(ContentKind::Talks, EditTarget::New);

        assert_eq!(panel.logout().unwrap(), SiteView::Public);
        assert_eq!(panel.view(), PanelView::default());
        assert!(!panel.gate().is_authenticated());

        let writes = store.writes();
        let result = panel.delete_project(1).await;
        assert!(matches!(
            result,
            Err(AdminError::Gateway(GatewayError::Unauthenticated))
        ));
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_unconfigured_panel_reports_errors() {
        let (gate, _) = test_gate(Arc::new(ManualClock::new(chrono::Utc::now())));
        let panel = panel_with(Remote::new(None, Arc::new(gate))).await;

        let dashboard = panel.dashboard();
        assert_eq!(dashboard.projects.count, 0);
        assert!(!dashboard.projects.loading);
        assert!(dashboard.projects.error.is_some());
        assert!(dashboard.settings_error.is_some());
    }
}
