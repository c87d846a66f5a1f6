use serde_json::Value;
use tracing::warn;

use crate::feed::Entry;

const GTV: &str = "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample";

/// Public demo clips used when no feed API is configured or the first page fails.
pub fn default_entries() -> Vec<Entry> {
    vec![
        Entry::new("1", format!("{GTV}/ElephantsDream.mp4"), "@elephantsdream", "Elephant's Dream - short film."),
        Entry::new("2", format!("{GTV}/Sintel.mp4"), "@sintel_movie", "Sintel - short movie."),
        Entry::new("3", format!("{GTV}/BigBuckBunny.mp4"), "@bigbuckbunny", "Big Buck Bunny - animation."),
        Entry::new("4", format!("{GTV}/ForBiggerBlazes.mp4"), "@sample", "For Bigger Blazes - sample clip."),
        Entry::new("5", format!("{GTV}/ForBiggerEscapes.mp4"), "@soccer_highlights", "Soccer highlights - goals and action."),
        Entry::new(
            "6",
            "https://test-videos.co.uk/vids/jellyfish/mp4/h264/360/Jellyfish_360_10s_1MB.mp4",
            "@atlantic_ocean",
            "Atlantic Ocean - jellyfish in the deep sea.",
        ),
        Entry::new("7", format!("{GTV}/ForBiggerFun.mp4"), "@fun", "For Bigger Fun - sample."),
        Entry::new("8", format!("{GTV}/ForBiggerJoyrides.mp4"), "@joyrides", "For Bigger Joyrides - sample."),
        Entry::new("9", format!("{GTV}/ForBiggerMeltdowns.mp4"), "@meltdowns", "For Bigger Meltdowns - sample."),
        Entry::new("10", format!("{GTV}/TearsOfSteel.mp4"), "@tearsofsteel", "Tears of Steel - short film."),
    ]
}

/// Parses a JSON array of entries, keeping only the well-formed ones.
/// Returns `None` when the input is not a JSON array at all.
pub fn parse_entries(raw: &str) -> Option<Vec<Entry>> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(target: "feed.fallback", %err, "fallback_json_invalid");
            return None;
        }
    };
    let Value::Array(items) = value else {
        return None;
    };
    let total = items.len();
    let entries: Vec<Entry> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Entry>(item).ok())
        .filter(|entry| !entry.id.is_empty() && !entry.playable.is_empty())
        .collect();
    if entries.len() != total {
        warn!(
            target: "feed.fallback",
            kept = entries.len(),
            dropped = total - entries.len(),
            "fallback_entries_filtered"
        );
    }
    Some(entries)
}

/// Resolves the configured override, falling back to the built-in list when
/// the override is absent, invalid or filters down to nothing.
pub fn resolve(configured: &[Entry], raw_override: Option<&str>) -> Vec<Entry> {
    if let Some(raw) = raw_override.map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(entries) = parse_entries(raw).filter(|list| !list.is_empty()) {
            return entries;
        }
    }
    if !configured.is_empty() {
        return configured.to_vec();
    }
    default_entries()
}
