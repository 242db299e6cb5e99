// utils/storage.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    Avatars,
    WorkerDocs,
    JobPhotos,
    // Older driver onboarding screens wrote here; still readable.
    WorkersDocs,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Avatars => "avatars",
            Bucket::WorkerDocs => "worker-docs",
            Bucket::JobPhotos => "job-photos",
            Bucket::WorkersDocs => "workers-docs",
        }
    }

    pub fn parse(raw: &str) -> Option<Bucket> {
        match raw {
            "avatars" => Some(Bucket::Avatars),
            "worker-docs" => Some(Bucket::WorkerDocs),
            "job-photos" => Some(Bucket::JobPhotos),
            "workers-docs" => Some(Bucket::WorkersDocs),
            _ => None,
        }
    }
}

/// Keeps only ascii alphanumerics and lowercases; falls back to `bin`.
fn clean_extension(ext: &str) -> String {
    let cleaned: String = ext
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();

    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}

/// `{user_id}/{label}_{timestamp_millis}.{ext}`
pub fn object_path(user_id: Uuid, label: &str, timestamp_millis: i64, ext: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    format!("{}/{}_{}.{}", user_id, label, timestamp_millis, clean_extension(ext))
}

/// True when `path` lives under the user's own prefix and has no traversal segments.
pub fn is_owned_path(user_id: Uuid, path: &str) -> bool {
    let prefix = format!("{}/", user_id);
    path.starts_with(&prefix)
        && path.len() > prefix.len()
        && !path.split('/').any(|segment| segment == ".." || segment.is_empty())
}

pub fn public_url(base_url: &str, bucket: Bucket, path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();

    format!(
        "{}/storage/v1/object/public/{}/{}",
        base_url.trim_end_matches('/'),
        bucket.as_str(),
        encoded.join("/")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_convention() {
        let user = Uuid::nil();
        let path = object_path(user, "id_front", 1_700_000_000_000, ".JPG");
        assert_eq!(
            path,
            "00000000-0000-0000-0000-000000000000/id_front_1700000000000.jpg"
        );
    }

    #[test]
    fn test_object_path_sanitizes_label_and_ext() {
        let user = Uuid::nil();
        let path = object_path(user, "../etc", 1, "");
        assert!(path.ends_with("/___etc_1.bin"));
        assert!(is_owned_path(user, &path));
    }

    #[test]
    fn test_owned_path_rejects_other_users_and_traversal() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(is_owned_path(me, &format!("{}/selfie_1.png", me)));
        assert!(!is_owned_path(me, &format!("{}/selfie_1.png", other)));
        assert!(!is_owned_path(me, &format!("{}/../x.png", me)));
        assert!(!is_owned_path(me, &format!("{}/", me)));
    }

    #[test]
    fn test_public_url_encodes_segments() {
        let url = public_url("https://cdn.example.com/", Bucket::JobPhotos, "u/a b.png");
        assert_eq!(
            url,
            "https://cdn.example.com/storage/v1/object/public/job-photos/u/a%20b.png"
        );
        assert_eq!(Bucket::parse("workers-docs"), Some(Bucket::WorkersDocs));
    }
}
