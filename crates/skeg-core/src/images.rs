//! Base image catalog, user image builds and image reuse

use crate::keys::{validate_username, SshKeyPair};
use crate::naming::{self, labels, IMAGE_FORMAT_VERSION, REGISTRY_ORG};
use crate::store::EnvironmentStore;
use crate::{CoreError, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use skeg_provider::{
    parse_repository_tag, send_progress, BuildConfig, ContainerProvider, ContextFile, ImageInfo,
};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Name of the public key inside the build context
const PUBLIC_KEY_FILE: &str = "skeg_key.pub";

/// Directory inside images holding one authorized key file per user
const KEYS_DIR: &str = "/etc/ssh/skeg_keys";

/// Timestamp embedded in generated image names, down to milliseconds
const IMAGE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// A tag of a catalog image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogTag {
    pub name: &'static str,
    pub preferred: bool,
}

/// An entry of the base image catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [CatalogTag],
}

const fn tag(name: &'static str, preferred: bool) -> CatalogTag {
    CatalogTag { name, preferred }
}

/// Base images published under [`REGISTRY_ORG`].
/// Each entry has exactly one preferred tag.
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "base",
        description: "Ubuntu with common build tools",
        tags: &[tag("16.04", true), tag("14.04", false)],
    },
    CatalogEntry {
        name: "clojure",
        description: "Clojure with leiningen",
        tags: &[tag("lein-2.6.1", true)],
    },
    CatalogEntry {
        name: "go",
        description: "Go toolchain",
        tags: &[tag("1.6", true), tag("1.5", false)],
    },
    CatalogEntry {
        name: "python",
        description: "Python with pip and virtualenv",
        tags: &[tag("3.5", true), tag("2.7", false)],
    },
    CatalogEntry {
        name: "node",
        description: "Node.js with npm",
        tags: &[tag("6", true), tag("4", false)],
    },
    CatalogEntry {
        name: "rust",
        description: "Rust via rustup",
        tags: &[tag("stable", true), tag("nightly", false)],
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseImageTag {
    pub name: String,
    pub pulled: bool,
    pub preferred: bool,
}

/// Catalog entry annotated with local availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseImage {
    pub name: String,
    pub description: String,
    pub tags: Vec<BaseImageTag>,
}

/// A previously built image owned by the current user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImage {
    pub name: String,
    /// Containers currently created from this image
    pub env_count: usize,
    pub labels: HashMap<String, String>,
    /// Image format version, 0 when unlabelled
    pub version: u32,
}

/// Image selector: a catalog type with an optional version, or a literal
/// image reference. The catalog form wins when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOpts {
    pub kind: String,
    pub version: String,
    pub image: String,
}

impl ImageOpts {
    pub fn catalog(kind: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: version.into(),
            image: String::new(),
        }
    }

    pub fn literal(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.image.is_empty()
    }

    /// Value recorded in the base label: the catalog type or the literal image
    pub fn base_label(&self) -> &str {
        if self.kind.is_empty() {
            &self.image
        } else {
            &self.kind
        }
    }
}

/// Everything a user image build depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOpts {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub image: ImageOpts,
    pub force_pull: bool,
    /// Empty means detect from the host
    pub timezone: String,
}

/// Annotate a catalog with which tags exist among `images`
pub fn annotate_catalog(catalog: &[CatalogEntry], images: &[ImageInfo], org: &str) -> Vec<BaseImage> {
    let present: Vec<&str> = images
        .iter()
        .flat_map(|i| i.repo_tags.iter().map(String::as_str))
        .collect();

    catalog
        .iter()
        .map(|entry| BaseImage {
            name: entry.name.to_string(),
            description: entry.description.to_string(),
            tags: entry
                .tags
                .iter()
                .map(|t| BaseImageTag {
                    name: t.name.to_string(),
                    pulled: present.contains(&naming::catalog_reference(org, entry.name, t.name).as_str()),
                    preferred: t.preferred,
                })
                .collect(),
        })
        .collect()
}

/// Resolve a selector against a catalog.
///
/// An empty selector resolves to an empty reference.
pub fn resolve_image_in(catalog: &[CatalogEntry], org: &str, opts: &ImageOpts) -> Result<String> {
    if opts.kind.is_empty() {
        return Ok(opts.image.clone());
    }

    let entry = catalog
        .iter()
        .find(|e| e.name == opts.kind)
        .ok_or_else(|| CoreError::ImageNotFound(format!("unknown type '{}'", opts.kind)))?;

    let tag = if opts.version.is_empty() {
        entry.tags.iter().find(|t| t.preferred)
    } else {
        entry.tags.iter().find(|t| t.name == opts.version)
    }
    .ok_or_else(|| {
        CoreError::ImageNotFound(format!("no version '{}' for type '{}'", opts.version, opts.kind))
    })?;

    Ok(naming::catalog_reference(org, entry.name, tag.name))
}

/// Resolve a selector against the published catalog
pub fn resolve_image(opts: &ImageOpts) -> Result<String> {
    resolve_image_in(CATALOG, REGISTRY_ORG, opts)
}

/// Add the implicit `:latest` tag to untagged references
pub fn normalize_reference(reference: &str) -> String {
    let (_, tag) = parse_repository_tag(reference);
    if tag.is_empty() && !reference.contains('@') {
        format!("{}:latest", reference)
    } else {
        reference.to_string()
    }
}

/// Pull `reference` unless it is already present and no pull is forced
pub async fn ensure_image_present(
    provider: &dyn ContainerProvider,
    reference: &str,
    force_pull: bool,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<()> {
    let normalized = normalize_reference(reference);

    if !force_pull {
        let images = provider.list_images(&[]).await?;
        if images.iter().any(|i| i.repo_tags.iter().any(|t| *t == normalized)) {
            tracing::debug!("Image {} already present", normalized);
            return Ok(());
        }
    }

    tracing::info!("Pulling {}", normalized);
    send_progress(progress, format!("Pulling {}", normalized));
    provider.pull(&normalized, progress).await?;
    Ok(())
}

/// Inputs of the build recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeParams<'a> {
    pub base: &'a str,
    pub username: &'a str,
    pub uid: u32,
    pub gid: u32,
    pub timezone: Option<&'a str>,
}

/// Render the Dockerfile layering a user account, ssh key and timezone onto
/// a base image. The public key is expected next to it as `skeg_key.pub`.
pub fn render_recipe(params: &RecipeParams<'_>) -> Result<String> {
    validate_username(params.username)?;
    validate_image_name(params.base)?;
    if let Some(tz) = params.timezone {
        validate_timezone(tz)?;
    }

    let user = params.username;
    let mut recipe = format!(
        "FROM {base}\n\
         USER root\n\
         RUN (getent group {gid} >/dev/null || groupadd --gid {gid} {user}) \\\n \
         && useradd --create-home --uid {uid} --gid {gid} --shell /bin/bash {user} \\\n \
         && mkdir -p /etc/sudoers.d \\\n \
         && echo '{user} ALL=(ALL) NOPASSWD:ALL' > /etc/sudoers.d/{user} \\\n \
         && chmod 0440 /etc/sudoers.d/{user}\n\
         RUN mkdir -p {keys} \\\n \
         && sed -i 's|^#\\?AuthorizedKeysFile.*|AuthorizedKeysFile {keys}/%u .ssh/authorized_keys|' /etc/ssh/sshd_config\n\
         COPY {key_file} {keys}/{user}\n\
         RUN chmod 0644 {keys}/{user}\n",
        base = params.base,
        uid = params.uid,
        gid = params.gid,
        user = user,
        keys = KEYS_DIR,
        key_file = PUBLIC_KEY_FILE,
    );

    if let Some(tz) = params.timezone {
        recipe.push_str(&format!(
            "RUN echo '{tz}' > /etc/timezone \\\n \
             && ln -sf /usr/share/zoneinfo/{tz} /etc/localtime\n\
             ENV TZ={tz}\n",
            tz = tz
        ));
    }

    Ok(recipe)
}

fn validate_image_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidRecipe("image name cannot be empty".into()));
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(CoreError::InvalidRecipe(format!(
            "image name contains invalid characters: {:?}",
            name
        )));
    }
    Ok(())
}

fn validate_timezone(tz: &str) -> Result<()> {
    if tz.is_empty()
        || tz.starts_with('/')
        || tz.contains("..")
        || !tz
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'))
    {
        return Err(CoreError::InvalidRecipe(format!("invalid timezone {:?}", tz)));
    }
    Ok(())
}

/// `skeg-<user>-<timestamp>` for `now`, moved a millisecond forward until it
/// is not one of `taken`
pub fn generate_image_name(username: &str, now: DateTime<Local>, taken: &[String]) -> String {
    let mut at = now;
    loop {
        let name = naming::user_image_name(username, &at.format(IMAGE_TIMESTAMP_FORMAT).to_string());
        if !taken.contains(&name) {
            return name;
        }
        at = at + chrono::Duration::milliseconds(1);
    }
}

/// Repository names of the images already labelled as `username`'s
async fn taken_image_names(provider: &dyn ContainerProvider, username: &str) -> Result<Vec<String>> {
    let images = provider
        .list_images(&[naming::label_filter(labels::USER, username)])
        .await?;
    Ok(images
        .iter()
        .flat_map(|i| i.repo_tags.iter())
        .map(|t| parse_repository_tag(t).0)
        .collect())
}

/// Build a new user image for `opts`, returning its generated name
pub async fn build_user_image(
    provider: &dyn ContainerProvider,
    store: &dyn EnvironmentStore,
    opts: &BuildOpts,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<String> {
    let base = resolve_image(&opts.image)?;
    if base.is_empty() {
        return Err(CoreError::ImageNotFound("no base type or image selected".into()));
    }

    ensure_image_present(provider, &base, opts.force_pull, progress).await?;

    let timezone = if opts.timezone.is_empty() {
        store.detect_timezone()
    } else {
        Some(opts.timezone.clone())
    };

    let keys: SshKeyPair = store.ensure_ssh_keypair()?;
    let public_key = store.read_public_key(&keys)?;

    let recipe = render_recipe(&RecipeParams {
        base: &base,
        username: &opts.username,
        uid: opts.uid,
        gid: opts.gid,
        timezone: timezone.as_deref(),
    })?;

    let now = Local::now();
    let taken = taken_image_names(provider, &opts.username).await?;
    let name = generate_image_name(&opts.username, now, &taken);

    let image_labels = HashMap::from([
        (labels::BASE.to_string(), opts.image.base_label().to_string()),
        (labels::BASE_IMAGE.to_string(), base.clone()),
        (labels::USER.to_string(), opts.username.clone()),
        (labels::UID.to_string(), opts.uid.to_string()),
        (labels::GID.to_string(), opts.gid.to_string()),
        (labels::BUILD_TIME.to_string(), now.to_rfc3339()),
        (labels::TIMEZONE.to_string(), timezone.unwrap_or_default()),
        (labels::VERSION.to_string(), IMAGE_FORMAT_VERSION.to_string()),
    ]);

    tracing::info!("Building image {} from {}", name, base);
    send_progress(progress, format!("Building {} from {}", name, base));

    let config = BuildConfig {
        tag: name.clone(),
        dockerfile: recipe,
        files: vec![ContextFile {
            name: PUBLIC_KEY_FILE.to_string(),
            contents: format!("{}\n", public_key).into_bytes(),
            mode: 0o644,
        }],
        labels: image_labels,
    };
    provider.build(&config, progress).await?;

    Ok(name)
}

/// User images built from the selected base, newest first
pub async fn list_user_images(
    provider: &dyn ContainerProvider,
    opts: &ImageOpts,
    username: &str,
) -> Result<Vec<UserImage>> {
    let base = resolve_image(opts)?;

    let mut filters = vec![naming::label_filter(labels::USER, username)];
    if !base.is_empty() {
        filters.push(naming::label_filter(labels::BASE_IMAGE, &base));
    }

    let images = provider.list_images(&filters).await?;
    let containers = provider.list().await?;

    let mut user_images: Vec<UserImage> = images
        .into_iter()
        .filter_map(|image| {
            let name = image
                .repo_tags
                .iter()
                .map(|t| parse_repository_tag(t).0)
                .find(|repo| !repo.is_empty() && repo != "<none>")?;
            let tagged = format!("{}:latest", name);
            let env_count = containers
                .iter()
                .filter(|c| c.image == name || c.image == tagged)
                .count();
            let version = image
                .labels
                .get(labels::VERSION)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Some(UserImage {
                name,
                env_count,
                labels: image.labels,
                version,
            })
        })
        .collect();

    user_images.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(user_images)
}

/// Reuse the newest user image when it is current, build a new one otherwise
pub async fn select_or_build_image(
    provider: &dyn ContainerProvider,
    store: &dyn EnvironmentStore,
    opts: &BuildOpts,
    force_build: bool,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<String> {
    if !force_build {
        let images = list_user_images(provider, &opts.image, &opts.username).await?;
        if let Some(newest) = images.first() {
            if newest.version >= IMAGE_FORMAT_VERSION {
                tracing::info!("Reusing image {}", newest.name);
                return Ok(newest.name.clone());
            }
            tracing::info!(
                "Image {} has format version {}, building a new one",
                newest.name,
                newest.version
            );
        }
    }

    build_user_image(provider, store, opts, progress).await
}

/// Labels of a container that survive into an image frozen from it
const FROZEN_LABELS: &[&str] = &[labels::BASE, labels::BASE_IMAGE, labels::TIMEZONE];

/// Commit the container `container` of `username` into a new user image.
///
/// The image carries the container's base and timezone labels and the
/// current format version, so the next create from the same base reuses it.
pub async fn freeze_container(
    provider: &dyn ContainerProvider,
    container: &str,
    container_labels: &HashMap<String, String>,
    username: &str,
    uid: u32,
    gid: u32,
) -> Result<String> {
    let now = Local::now();
    let taken = taken_image_names(provider, username).await?;
    let name = generate_image_name(username, now, &taken);

    let mut image_labels: HashMap<String, String> = FROZEN_LABELS
        .iter()
        .filter_map(|k| container_labels.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    image_labels.extend([
        (labels::USER.to_string(), username.to_string()),
        (labels::UID.to_string(), uid.to_string()),
        (labels::GID.to_string(), gid.to_string()),
        (labels::BUILD_TIME.to_string(), now.to_rfc3339()),
        (labels::VERSION.to_string(), IMAGE_FORMAT_VERSION.to_string()),
    ]);

    tracing::info!("Committing {} to {}", container, name);
    provider.commit(container, &name, &image_labels).await?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use chrono::TimeZone;
    use skeg_provider::ImageId;

    fn image(tags: &[&str]) -> ImageInfo {
        ImageInfo {
            id: ImageId::new(format!("sha256:{}", tags.join(","))),
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
            labels: HashMap::new(),
            created: 0,
        }
    }

    fn build_opts() -> BuildOpts {
        BuildOpts {
            username: "alice".to_string(),
            uid: 1000,
            gid: 1000,
            image: ImageOpts::catalog("go", ""),
            force_pull: false,
            timezone: String::new(),
        }
    }

    #[test]
    fn test_catalog_has_one_preferred_tag_per_entry() {
        for entry in CATALOG {
            assert_eq!(
                entry.tags.iter().filter(|t| t.preferred).count(),
                1,
                "{} must have exactly one preferred tag",
                entry.name
            );
        }
    }

    #[test]
    fn test_annotate_catalog_pulled() {
        let catalog = annotate_catalog(CATALOG, &[image(&["skegio/go:1.6"]), image(&["skegio/python:3.4"])], REGISTRY_ORG);

        for entry in &catalog {
            for t in &entry.tags {
                if entry.name == "go" && t.name == "1.6" {
                    assert!(t.pulled);
                    assert!(t.preferred);
                } else {
                    assert!(!t.pulled, "{}:{} should not be pulled", entry.name, t.name);
                }
            }
        }
        // the static catalog is untouched
        assert_eq!(CATALOG[2].tags[0], tag("1.6", true));
    }

    #[test]
    fn test_resolve_image() {
        assert_eq!(resolve_image(&ImageOpts::catalog("go", "")).unwrap(), "skegio/go:1.6");
        assert_eq!(resolve_image(&ImageOpts::catalog("go", "1.5")).unwrap(), "skegio/go:1.5");
        assert_eq!(resolve_image(&ImageOpts::literal("ubuntu:16.04")).unwrap(), "ubuntu:16.04");
        assert_eq!(resolve_image(&ImageOpts::default()).unwrap(), "");
        assert!(matches!(
            resolve_image(&ImageOpts::catalog("go", "0.1")),
            Err(CoreError::ImageNotFound(_))
        ));
        assert!(matches!(
            resolve_image(&ImageOpts::catalog("cobol", "")),
            Err(CoreError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_against_custom_catalog() {
        const CUSTOM: &[CatalogEntry] = &[CatalogEntry {
            name: "go",
            description: "",
            tags: &[tag("1.5", false), tag("1.6", true), tag("1.7", false)],
        }];
        let resolved = resolve_image_in(CUSTOM, "org", &ImageOpts::catalog("go", "1.7")).unwrap();
        assert_eq!(resolved, "org/go:1.7");
        let resolved = resolve_image_in(CUSTOM, "org", &ImageOpts::catalog("go", "")).unwrap();
        assert_eq!(resolved, "org/go:1.6");
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("ubuntu"), "ubuntu:latest");
        assert_eq!(normalize_reference("ubuntu:16.04"), "ubuntu:16.04");
        assert_eq!(normalize_reference("localhost:5000/app"), "localhost:5000/app:latest");
    }

    #[test]
    fn test_render_recipe() {
        let recipe = render_recipe(&RecipeParams {
            base: "skegio/go:1.6",
            username: "alice",
            uid: 1001,
            gid: 1002,
            timezone: Some("America/Chicago"),
        })
        .unwrap();

        assert!(recipe.starts_with("FROM skegio/go:1.6\n"));
        assert!(recipe.contains("useradd --create-home --uid 1001 --gid 1002"));
        assert!(recipe.contains("NOPASSWD:ALL' > /etc/sudoers.d/alice"));
        assert!(recipe.contains("COPY skeg_key.pub /etc/ssh/skeg_keys/alice"));
        assert!(recipe.contains("/usr/share/zoneinfo/America/Chicago"));

        let no_tz = render_recipe(&RecipeParams {
            timezone: None,
            base: "ubuntu",
            username: "alice",
            uid: 1000,
            gid: 1000,
        })
        .unwrap();
        assert!(!no_tz.contains("zoneinfo"));
    }

    #[test]
    fn test_render_recipe_rejects_injection() {
        let params = RecipeParams {
            base: "ubuntu",
            username: "alice",
            uid: 1000,
            gid: 1000,
            timezone: None,
        };
        assert!(render_recipe(&RecipeParams { base: "ubuntu\nRUN rm -rf /", ..params.clone() }).is_err());
        assert!(render_recipe(&RecipeParams { username: "root; id", ..params.clone() }).is_err());
        assert!(render_recipe(&RecipeParams { timezone: Some("'; id; '"), ..params.clone() }).is_err());
        assert!(render_recipe(&RecipeParams { timezone: Some("../../etc/passwd"), ..params }).is_err());
    }

    #[tokio::test]
    async fn test_ensure_image_present_skips_pull() {
        let mock = MockProvider::new();
        mock.add_image(image(&["ubuntu:latest"]));

        ensure_image_present(&mock, "ubuntu", false, None).await.unwrap();
        assert!(!mock.get_calls().iter().any(|c| matches!(c, MockCall::Pull { .. })));

        ensure_image_present(&mock, "ubuntu", true, None).await.unwrap();
        assert!(mock.was_called(&MockCall::Pull { image: "ubuntu:latest".into() }));
    }

    #[tokio::test]
    async fn test_ensure_image_present_pull_failure() {
        let mock = MockProvider::new();
        mock.fail_pull("registry unreachable");
        let err = ensure_image_present(&mock, "skegio/go:1.6", false, None).await.unwrap_err();
        assert!(err.to_string().contains("registry unreachable"));
    }

    #[tokio::test]
    async fn test_build_user_image() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.set_timezone(Some("Europe/Paris"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let name = build_user_image(&mock, &store, &build_opts(), Some(&tx)).await.unwrap();
        assert!(name.starts_with("skeg-alice-"));

        // the base image was pulled first
        assert!(mock.was_called(&MockCall::Pull { image: "skegio/go:1.6".into() }));

        let build = mock.last_build().unwrap();
        assert_eq!(build.tag, name);
        assert!(build.dockerfile.starts_with("FROM skegio/go:1.6"));
        assert!(build.dockerfile.contains("Europe/Paris"));
        assert_eq!(build.files[0].name, "skeg_key.pub");
        assert_eq!(build.labels[labels::BASE], "go");
        assert_eq!(build.labels[labels::BASE_IMAGE], "skegio/go:1.6");
        assert_eq!(build.labels[labels::USER], "alice");
        assert_eq!(build.labels[labels::TIMEZONE], "Europe/Paris");
        assert_eq!(build.labels[labels::VERSION], IMAGE_FORMAT_VERSION.to_string());

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.iter().any(|l| l.contains("Building")));
    }

    #[tokio::test]
    async fn test_build_requires_selector() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        let opts = BuildOpts {
            image: ImageOpts::default(),
            ..build_opts()
        };
        assert!(matches!(
            build_user_image(&mock, &store, &opts, None).await,
            Err(CoreError::ImageNotFound(_))
        ));
        assert!(mock.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_user_images_counts_and_order() {
        let mock = MockProvider::new();
        mock.add_user_image("skeg-alice-20160101000000", "alice", "skegio/go:1.6", "1");
        mock.add_user_image("skeg-alice-20160301000000", "alice", "skegio/go:1.6", "2");
        mock.add_user_image("skeg-bob-20160401000000", "bob", "skegio/go:1.6", "2");
        mock.add_user_image("skeg-alice-20160501000000", "alice", "ubuntu:16.04", "2");
        mock.add_container(mock_container("skeg_alice_a", "skeg-alice-20160301000000", true));
        mock.add_container(mock_container("skeg_alice_b", "skeg-alice-20160301000000:latest", false));
        mock.add_container(mock_container("skeg_alice_c", "skeg-alice-20160101000000", true));

        let images = list_user_images(&mock, &ImageOpts::catalog("go", "1.6"), "alice")
            .await
            .unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["skeg-alice-20160301000000", "skeg-alice-20160101000000"]);
        assert_eq!(images[0].env_count, 2);
        assert_eq!(images[0].version, 2);
        assert_eq!(images[1].env_count, 1);
        assert_eq!(images[1].version, 1);
    }

    #[tokio::test]
    async fn test_unlabelled_version_is_zero() {
        let mock = MockProvider::new();
        let mut info = image(&["skeg-alice-20150101000000:latest"]);
        info.labels = HashMap::from([
            (labels::USER.to_string(), "alice".to_string()),
            (labels::BASE_IMAGE.to_string(), "skegio/go:1.6".to_string()),
        ]);
        mock.add_image(info);

        let images = list_user_images(&mock, &ImageOpts::catalog("go", ""), "alice").await.unwrap();
        assert_eq!(images[0].version, 0);
    }

    #[tokio::test]
    async fn test_select_reuses_current_image() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        mock.add_user_image(
            "skeg-alice-20160301000000",
            "alice",
            "skegio/go:1.6",
            &IMAGE_FORMAT_VERSION.to_string(),
        );

        let name = select_or_build_image(&mock, &store, &build_opts(), false, None).await.unwrap();
        assert_eq!(name, "skeg-alice-20160301000000");
        assert!(mock.last_build().is_none());

        let rebuilt = select_or_build_image(&mock, &store, &build_opts(), true, None).await.unwrap();
        assert_ne!(rebuilt, "skeg-alice-20160301000000");
        assert!(mock.last_build().is_some());
    }

    #[tokio::test]
    async fn test_select_rebuilds_outdated_image() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        mock.add_user_image("skeg-alice-20160301000000", "alice", "skegio/go:1.6", "0");

        let name = select_or_build_image(&mock, &store, &build_opts(), false, None).await.unwrap();
        assert_ne!(name, "skeg-alice-20160301000000");
        assert!(mock.last_build().is_some());
    }

    #[test]
    fn test_generate_image_name_skips_taken() {
        let now = Local.with_ymd_and_hms(2016, 3, 1, 12, 30, 5).unwrap();
        let first = generate_image_name("alice", now, &[]);
        assert_eq!(first, "skeg-alice-20160301123005000");

        let second = generate_image_name("alice", now, &[first.clone()]);
        assert_eq!(second, "skeg-alice-20160301123005001");
        // newer names still sort after second-precision ones
        assert!(second.as_str() > "skeg-alice-20160301123005");
    }

    #[tokio::test]
    async fn test_back_to_back_builds_get_distinct_names() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");

        let first = build_user_image(&mock, &store, &build_opts(), None).await.unwrap();
        let second = build_user_image(&mock, &store, &build_opts(), None).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(mock.count_calls(|c| matches!(c, MockCall::Build { .. })), 2);
    }

    #[tokio::test]
    async fn test_freeze_container_is_reused() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        let mut container = mock_container("skeg_alice_web", "skeg-alice-20160101000000", true);
        container.labels = HashMap::from([
            (labels::BASE.to_string(), "go".to_string()),
            (labels::BASE_IMAGE.to_string(), "skegio/go:1.6".to_string()),
            (labels::TIMEZONE.to_string(), "Asia/Tokyo".to_string()),
            (labels::HOME_VOLUME.to_string(), "false".to_string()),
        ]);
        mock.add_container(container.clone());

        let name = freeze_container(&mock, "skeg_alice_web", &container.labels, "alice", 1000, 1000)
            .await
            .unwrap();
        assert!(name.starts_with("skeg-alice-"));
        assert!(mock.was_called(&MockCall::Commit {
            name: "skeg_alice_web".into(),
            tag: name.clone(),
        }));

        let images = list_user_images(&mock, &ImageOpts::catalog("go", ""), "alice").await.unwrap();
        assert_eq!(images[0].name, name);
        assert_eq!(images[0].version, IMAGE_FORMAT_VERSION);
        assert_eq!(images[0].labels[labels::TIMEZONE], "Asia/Tokyo");
        assert!(!images[0].labels.contains_key(labels::HOME_VOLUME));

        let selected = select_or_build_image(&mock, &store, &build_opts(), false, None).await.unwrap();
        assert_eq!(selected, name);
        assert!(mock.last_build().is_none());
    }
}
