use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub artist_id: String,
    pub title: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Filled in by the catalog once the owning artist is known.
    #[serde(default)]
    pub artist: Option<ArtistRef>,
    #[serde(default)]
    pub art: Option<CoverArt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub album_id: String,
    pub artist_id: String,
    pub title: String,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub duration_ms: u32,
    #[serde(default)]
    pub codec: Option<Codec>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub artist: Option<ArtistRef>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

/// Back-reference from an album or track to its artist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverArt {
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    Flac,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Artist, EntityKind::Album, EntityKind::Track];

    /// Plural collection name, used for URL segments and table names.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Artist => "artists",
            EntityKind::Album => "albums",
            EntityKind::Track => "tracks",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "artist" | "artists" => Some(Self::Artist),
            "album" | "albums" => Some(Self::Album),
            "track" | "tracks" => Some(Self::Track),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Identity of a server account, used to name and validate local caches.
pub fn account_id(server_url: &str, user: &str) -> String {
    let normalized = server_url.trim().trim_end_matches('/').to_ascii_lowercase();
    stable_id(&format!("{}\x1f{}", normalized, user.trim()))
}
