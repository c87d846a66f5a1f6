use crate::feed::{Entry, PlayableRef};

pub const MUX_HLS_BASE: &str = "https://stream.mux.com";
pub const CLOUDINARY_BASE: &str = "https://res.cloudinary.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    pub mux_base: String,
    pub cloudinary_base: String,
    pub cloudinary_cloud_name: String,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            mux_base: MUX_HLS_BASE.to_string(),
            cloudinary_base: CLOUDINARY_BASE.to_string(),
            cloudinary_cloud_name: "demo".to_string(),
        }
    }
}

impl Resolver {
    /// Picks the lowest-latency form available: Mux HLS, then Cloudinary, then
    /// the direct `src`. Returns an empty string when nothing is playable.
    pub fn playable_url(&self, playable: &PlayableRef) -> String {
        if let Some(id) = non_blank(playable.mux_playback_id.as_deref()) {
            return format!("{}/{}.m3u8", self.mux_base.trim_end_matches('/'), id);
        }
        if let Some(id) = non_blank(playable.cloudinary_public_id.as_deref()) {
            let cloud = non_blank(Some(&self.cloudinary_cloud_name)).unwrap_or("demo");
            return format!(
                "{}/{}/video/upload/f_auto,q_auto/{}",
                self.cloudinary_base.trim_end_matches('/'),
                cloud,
                id
            );
        }
        non_blank(playable.src.as_deref())
            .map(sanitize_url)
            .unwrap_or_default()
    }

    pub fn entry_url(&self, entry: &Entry) -> String {
        self.playable_url(&entry.playable)
    }
}

pub fn is_hls_url(url: &str) -> bool {
    url.contains(".m3u8")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn sanitize_url(raw: &str) -> String {
    raw.trim().replace("&amp;", "&")
}
