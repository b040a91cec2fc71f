use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{now_timestamp, Database};
use crate::error::{VideoError, VideoResult};
use crate::images::ImageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileMode {
    Fictional,
    RealIdentity,
}

impl ProfileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileMode::Fictional => "fictional",
            ProfileMode::RealIdentity => "real_identity",
        }
    }

    fn parse(s: &str) -> VideoResult<Self> {
        match s {
            "fictional" => Ok(ProfileMode::Fictional),
            "real_identity" => Ok(ProfileMode::RealIdentity),
            other => Err(VideoError::service(format!(
                "unknown profile mode '{other}'"
            ))),
        }
    }
}

/// Non-prompt parameters pinned per profile so generations stay reproducible
/// and identity-consistent. Stored as a JSON blob; unknown-age blobs hydrate
/// through the serde defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLock {
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub loras: Vec<String>,
    #[serde(default)]
    pub vae: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub cfg_scale: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub seed_strategy: Option<String>,
    #[serde(default)]
    pub seed_jitter: i64,
    #[serde(default = "default_reference_weight")]
    pub reference_weight: f64,
    #[serde(default = "default_strict_lock")]
    pub strict_lock: bool,
}

fn default_reference_weight() -> f64 {
    1.0
}

fn default_strict_lock() -> bool {
    true
}

impl Default for GenerationLock {
    fn default() -> Self {
        GenerationLock {
            base_model: None,
            loras: Vec::new(),
            vae: None,
            prompt_template: None,
            negative_prompt: None,
            cfg_scale: None,
            seed: None,
            seed_strategy: None,
            seed_jitter: 0,
            reference_weight: 1.0,
            strict_lock: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub mode: ProfileMode,
    pub consent_checked: bool,
    pub reference_images: Vec<String>,
    pub generation_lock: GenerationLock,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileCreate {
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: ProfileMode,
    #[serde(default)]
    pub consent_checked: bool,
    #[serde(default)]
    pub generation_lock: GenerationLock,
}

fn default_mode() -> ProfileMode {
    ProfileMode::Fictional
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<ProfileMode>,
    #[serde(default)]
    pub consent_checked: Option<bool>,
    #[serde(default)]
    pub generation_lock: Option<GenerationLock>,
}

pub struct ProfileService {
    db: Arc<Database>,
    images: Arc<dyn ImageStore>,
    config: Arc<AppConfig>,
}

impl ProfileService {
    pub fn new(db: Arc<Database>, images: Arc<dyn ImageStore>, config: Arc<AppConfig>) -> Self {
        ProfileService { db, images, config }
    }

    pub fn create(&self, profile: ProfileCreate) -> VideoResult<Profile> {
        validate_name(&profile.name)?;
        self.validate_mode(profile.mode, profile.consent_checked)?;

        let profile_id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let lock_json = serde_json::to_string(&profile.generation_lock)?;

        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO video_profiles (
                    id, name, mode, consent_checked, generation_lock_json, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    profile_id,
                    profile.name,
                    profile.mode.as_str(),
                    profile.consent_checked,
                    lock_json,
                    now,
                    now
                ],
            )?;
            Ok(())
        })?;

        self.get(&profile_id)
    }

    pub fn list(&self) -> VideoResult<Vec<Profile>> {
        self.db.transaction(|tx| {
            let mut stmt = tx.prepare("SELECT id FROM video_profiles ORDER BY created_at DESC")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.iter().map(|id| Self::load_profile(tx, id)).collect()
        })
    }

    pub fn get(&self, profile_id: &str) -> VideoResult<Profile> {
        self.db.transaction(|tx| Self::load_profile(tx, profile_id))
    }

    pub fn update(&self, profile_id: &str, changes: ProfileUpdate) -> VideoResult<Profile> {
        let current = self.get(profile_id)?;

        // The invariant is checked against the effective post-patch values.
        let mode = changes.mode.unwrap_or(current.mode);
        let consent_checked = changes.consent_checked.unwrap_or(current.consent_checked);
        self.validate_mode(mode, consent_checked)?;
        if let Some(name) = &changes.name {
            validate_name(name)?;
        }

        self.db.transaction(|tx| {
            if let Some(name) = &changes.name {
                tx.execute(
                    "UPDATE video_profiles SET name = ?1 WHERE id = ?2",
                    params![name, profile_id],
                )?;
            }
            if let Some(mode) = changes.mode {
                tx.execute(
                    "UPDATE video_profiles SET mode = ?1 WHERE id = ?2",
                    params![mode.as_str(), profile_id],
                )?;
            }
            if let Some(consent) = changes.consent_checked {
                tx.execute(
                    "UPDATE video_profiles SET consent_checked = ?1 WHERE id = ?2",
                    params![consent, profile_id],
                )?;
            }
            if let Some(lock) = &changes.generation_lock {
                tx.execute(
                    "UPDATE video_profiles SET generation_lock_json = ?1 WHERE id = ?2",
                    params![serde_json::to_string(lock)?, profile_id],
                )?;
            }
            tx.execute(
                "UPDATE video_profiles SET updated_at = ?1 WHERE id = ?2",
                params![now_timestamp(), profile_id],
            )?;
            Ok(())
        })?;

        self.get(profile_id)
    }

    /// Idempotent; references and jobs go with the profile via cascade.
    pub fn delete(&self, profile_id: &str) -> VideoResult<()> {
        self.db.transaction(|tx| {
            tx.execute(
                "DELETE FROM video_profiles WHERE id = ?1",
                params![profile_id],
            )?;
            Ok(())
        })
    }

    /// Replace the profile's reference list, preserving input order. All
    /// names are validated against the image store before anything is
    /// written, so a failure leaves the previous list untouched.
    pub fn set_references(&self, profile_id: &str, image_names: &[String]) -> VideoResult<Profile> {
        self.get(profile_id)?;

        let mut clean_names = Vec::new();
        for raw in image_names {
            if raw.trim().is_empty() {
                continue;
            }
            let name = Path::new(raw)
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    VideoError::validation(format!("Reference image '{raw}' is invalid"))
                })?
                .to_string();
            clean_names.push(name);
        }

        for image_name in &clean_names {
            let path = self.images.get_path(image_name)?;
            if !path.exists() {
                return Err(VideoError::validation(format!(
                    "Reference image '{image_name}' was not found"
                )));
            }
        }

        self.db.transaction(|tx| {
            tx.execute(
                "DELETE FROM video_profile_references WHERE profile_id = ?1",
                params![profile_id],
            )?;
            for (order, image_name) in clean_names.iter().enumerate() {
                tx.execute(
                    "INSERT OR IGNORE INTO video_profile_references (
                        id, profile_id, image_name, sort_order
                     ) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        Uuid::new_v4().to_string(),
                        profile_id,
                        image_name,
                        order as i64
                    ],
                )?;
            }
            tx.execute(
                "UPDATE video_profiles SET updated_at = ?1 WHERE id = ?2",
                params![now_timestamp(), profile_id],
            )?;
            Ok(())
        })?;

        self.get(profile_id)
    }

    pub(crate) fn validate_mode(&self, mode: ProfileMode, consent_checked: bool) -> VideoResult<()> {
        if mode == ProfileMode::RealIdentity
            && self.config.require_consent_for_real_identity
            && !consent_checked
        {
            return Err(VideoError::validation(
                "Consent is required for real identity mode",
            ));
        }
        Ok(())
    }

    fn load_profile(tx: &Transaction, profile_id: &str) -> VideoResult<Profile> {
        let row: Option<(String, String, String, bool, String, String, String)> = tx
            .query_row(
                "SELECT id, name, mode, consent_checked, generation_lock_json, created_at, updated_at
                 FROM video_profiles
                 WHERE id = ?1",
                params![profile_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        let (id, name, mode, consent_checked, lock_json, created_at, updated_at) =
            row.ok_or_else(|| {
                VideoError::not_found(format!("Video profile '{profile_id}' not found"))
            })?;

        let reference_images = Self::load_references(tx, &id)?;

        Ok(Profile {
            mode: ProfileMode::parse(&mode)?,
            generation_lock: serde_json::from_str(&lock_json)?,
            id,
            name,
            consent_checked,
            reference_images,
            created_at,
            updated_at,
        })
    }

    fn load_references(tx: &Transaction, profile_id: &str) -> VideoResult<Vec<String>> {
        let mut stmt = tx.prepare(
            "SELECT image_name FROM video_profile_references
             WHERE profile_id = ?1
             ORDER BY sort_order ASC",
        )?;
        let rows = stmt.query_map(params![profile_id], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

fn validate_name(name: &str) -> VideoResult<()> {
    let len = name.chars().count();
    if len == 0 || len > 200 {
        return Err(VideoError::validation(
            "Profile name must be between 1 and 200 characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::DiskImageStore;

    struct Fixture {
        _data_dir: tempfile::TempDir,
        images_dir: std::path::PathBuf,
        service: ProfileService,
    }

    fn fixture() -> Fixture {
        let data_dir = tempfile::tempdir().unwrap();
        let images_dir = data_dir.path().join("images");
        std::fs::create_dir_all(&images_dir).unwrap();

        let db = Arc::new(Database::open(&data_dir.path().join("test.db")).unwrap());
        let images: Arc<dyn ImageStore> = Arc::new(DiskImageStore::new(images_dir.clone()));
        let config = Arc::new(AppConfig::default());
        let service = ProfileService::new(db, images, config);

        Fixture {
            _data_dir: data_dir,
            images_dir,
            service,
        }
    }

    fn add_image(f: &Fixture, name: &str) {
        std::fs::write(f.images_dir.join(name), b"png").unwrap();
    }

    fn create_request(name: &str) -> ProfileCreate {
        ProfileCreate {
            name: name.to_string(),
            mode: ProfileMode::Fictional,
            consent_checked: false,
            generation_lock: GenerationLock::default(),
        }
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let f = fixture();
        let lock = GenerationLock {
            base_model: Some("sdxl".into()),
            loras: vec!["style-a".into(), "style-b".into()],
            cfg_scale: Some(6.5),
            seed: Some(42),
            seed_strategy: Some("fixed".into()),
            reference_weight: 0.8,
            strict_lock: false,
            ..GenerationLock::default()
        };
        let created = f
            .service
            .create(ProfileCreate {
                name: "A".into(),
                mode: ProfileMode::Fictional,
                consent_checked: false,
                generation_lock: lock.clone(),
            })
            .unwrap();

        let fetched = f.service.get(&created.id).unwrap();
        assert_eq!(fetched.name, "A");
        assert_eq!(fetched.mode, ProfileMode::Fictional);
        assert_eq!(fetched.generation_lock, lock);
        assert!(fetched.reference_images.is_empty());
    }

    #[test]
    fn test_generation_lock_defaults_from_empty_blob() {
        let lock: GenerationLock = serde_json::from_str("{}").unwrap();
        assert_eq!(lock, GenerationLock::default());
        assert!(lock.strict_lock);
        assert!((lock.reference_weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let f = fixture();
        match f.service.get("nope") {
            Err(VideoError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_consent_required_for_real_identity() {
        let f = fixture();
        let result = f.service.create(ProfileCreate {
            name: "B".into(),
            mode: ProfileMode::RealIdentity,
            consent_checked: false,
            generation_lock: GenerationLock::default(),
        });
        assert!(matches!(result, Err(VideoError::Validation(_))));

        let ok = f.service.create(ProfileCreate {
            name: "B".into(),
            mode: ProfileMode::RealIdentity,
            consent_checked: true,
            generation_lock: GenerationLock::default(),
        });
        assert!(ok.is_ok());
    }

    #[test]
    fn test_update_checks_effective_mode_and_consent() {
        let f = fixture();
        let profile = f.service.create(create_request("C")).unwrap();

        // Flipping to real identity without consent must fail and leave the
        // row untouched.
        let result = f.service.update(
            &profile.id,
            ProfileUpdate {
                mode: Some(ProfileMode::RealIdentity),
                ..ProfileUpdate::default()
            },
        );
        assert!(matches!(result, Err(VideoError::Validation(_))));
        assert_eq!(
            f.service.get(&profile.id).unwrap().mode,
            ProfileMode::Fictional
        );

        // Same patch with consent in the same request succeeds.
        let updated = f
            .service
            .update(
                &profile.id,
                ProfileUpdate {
                    mode: Some(ProfileMode::RealIdentity),
                    consent_checked: Some(true),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.mode, ProfileMode::RealIdentity);
        assert!(updated.consent_checked);
        assert!(updated.updated_at > profile.updated_at);
    }

    #[test]
    fn test_update_patches_only_present_fields() {
        let f = fixture();
        let profile = f.service.create(create_request("before")).unwrap();
        let updated = f
            .service
            .update(
                &profile.id,
                ProfileUpdate {
                    name: Some("after".into()),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "after");
        assert_eq!(updated.mode, profile.mode);
        assert_eq!(updated.generation_lock, profile.generation_lock);
    }

    #[test]
    fn test_name_length_is_validated() {
        let f = fixture();
        assert!(matches!(
            f.service.create(create_request("")),
            Err(VideoError::Validation(_))
        ));
        assert!(matches!(
            f.service.create(create_request(&"x".repeat(201))),
            Err(VideoError::Validation(_))
        ));
        assert!(f.service.create(create_request(&"x".repeat(200))).is_ok());
    }

    #[test]
    fn test_list_orders_newest_first() {
        let f = fixture();
        let first = f.service.create(create_request("first")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = f.service.create(create_request("second")).unwrap();

        let listed = f.service.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let f = fixture();
        let profile = f.service.create(create_request("D")).unwrap();
        f.service.delete(&profile.id).unwrap();
        f.service.delete(&profile.id).unwrap();
        f.service.delete("never-existed").unwrap();
        assert!(f.service.get(&profile.id).is_err());
    }

    #[test]
    fn test_set_references_preserves_order() {
        let f = fixture();
        add_image(&f, "a.png");
        add_image(&f, "b.png");
        let profile = f.service.create(create_request("E")).unwrap();

        let updated = f
            .service
            .set_references(&profile.id, &["b.png".into(), "a.png".into()])
            .unwrap();
        assert_eq!(updated.reference_images, vec!["b.png", "a.png"]);
    }

    #[test]
    fn test_set_references_trims_to_filename_and_skips_blanks() {
        let f = fixture();
        add_image(&f, "a.png");
        let profile = f.service.create(create_request("F")).unwrap();

        let updated = f
            .service
            .set_references(
                &profile.id,
                &["some/dir/a.png".into(), "  ".into(), String::new()],
            )
            .unwrap();
        assert_eq!(updated.reference_images, vec!["a.png"]);
    }

    #[test]
    fn test_set_references_failure_preserves_previous_list() {
        let f = fixture();
        add_image(&f, "a.png");
        let profile = f.service.create(create_request("G")).unwrap();
        f.service
            .set_references(&profile.id, &["a.png".into()])
            .unwrap();

        let result = f
            .service
            .set_references(&profile.id, &["a.png".into(), "missing.png".into()]);
        assert!(matches!(result, Err(VideoError::Validation(_))));
        assert_eq!(
            f.service.get(&profile.id).unwrap().reference_images,
            vec!["a.png"]
        );
    }

    #[test]
    fn test_set_references_accepts_empty_list() {
        let f = fixture();
        add_image(&f, "a.png");
        let profile = f.service.create(create_request("H")).unwrap();
        f.service
            .set_references(&profile.id, &["a.png".into()])
            .unwrap();

        let cleared = f.service.set_references(&profile.id, &[]).unwrap();
        assert!(cleared.reference_images.is_empty());
    }

    #[test]
    fn test_set_references_unknown_profile_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.service.set_references("nope", &[]),
            Err(VideoError::NotFound(_))
        ));
    }
}
