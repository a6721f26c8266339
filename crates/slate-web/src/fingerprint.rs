//! Cheap change detection for post lists.

use slate_store::Post;

/// Fingerprint a list of posts for change detection.
///
/// Concatenates `id:status:updated_at` per post, so any status flip, edit,
/// or membership change produces a different value. Not a hash: collisions
/// are impossible, and the cost is proportional to the list being rendered
/// anyway.
pub fn fingerprint(posts: &[Post]) -> String {
    if posts.is_empty() {
        return "empty".to_string();
    }

    let mut out = String::with_capacity(posts.len() * 64);
    for post in posts {
        let status = serde_json::to_string(&post.status).unwrap_or_default();
        out.push_str(&format!(
            "{}:{}:{};",
            post.id,
            status.trim_matches('"'),
            post.updated_at.timestamp()
        ));
    }
    out
}
