//! Short authentication string derivation.
//!
//! Both ends of an established channel derive the same SAS from the channel
//! secret and the two identity keys, then the humans compare the rendered
//! values out loud. Identical secrets yield identical strings; differing
//! secrets yield differing strings with overwhelming probability.
//!
//! Two renderings are derived from the same bytes: seven emoji (6 bits each)
//! for quick visual comparison, and three four-digit decimal groups for
//! voice-only channels.

use hkdf::Hkdf;
use sha2::Sha256;

/// Domain separation label for SAS derivation.
const SAS_INFO: &[u8] = b"conclave sas v1";

/// Number of emoji in the rendered SAS.
pub const EMOJI_COUNT: usize = 7;

/// Number of decimal groups in the rendered SAS.
const DECIMAL_COUNT: usize = 3;

/// Emoji table indexed by 6-bit values. Entries are chosen to be visually
/// distinct and easy to name across languages.
const EMOJI: [(&str, &str); 64] = [
    ("🐶", "dog"),
    ("🐱", "cat"),
    ("🦁", "lion"),
    ("🐎", "horse"),
    ("🦄", "unicorn"),
    ("🐷", "pig"),
    ("🐘", "elephant"),
    ("🐰", "rabbit"),
    ("🐼", "panda"),
    ("🐓", "rooster"),
    ("🐧", "penguin"),
    ("🐢", "turtle"),
    ("🐟", "fish"),
    ("🐙", "octopus"),
    ("🦋", "butterfly"),
    ("🌷", "flower"),
    ("🌳", "tree"),
    ("🌵", "cactus"),
    ("🍄", "mushroom"),
    ("🌏", "globe"),
    ("🌙", "moon"),
    ("☁️", "cloud"),
    ("🔥", "fire"),
    ("🍌", "banana"),
    ("🍎", "apple"),
    ("🍓", "strawberry"),
    ("🌽", "corn"),
    ("🍕", "pizza"),
    ("🎂", "cake"),
    ("❤️", "heart"),
    ("😀", "smiley"),
    ("🤖", "robot"),
    ("🎩", "hat"),
    ("👓", "glasses"),
    ("🔧", "spanner"),
    ("🎅", "santa"),
    ("👍", "thumbs up"),
    ("☂️", "umbrella"),
    ("⌛", "hourglass"),
    ("⏰", "clock"),
    ("🎁", "gift"),
    ("💡", "light bulb"),
    ("📕", "book"),
    ("✏️", "pencil"),
    ("📎", "paperclip"),
    ("✂️", "scissors"),
    ("🔒", "lock"),
    ("🔑", "key"),
    ("🔨", "hammer"),
    ("☎️", "telephone"),
    ("🏁", "flag"),
    ("🚂", "train"),
    ("🚲", "bicycle"),
    ("✈️", "aeroplane"),
    ("🚀", "rocket"),
    ("🏆", "trophy"),
    ("⚽", "ball"),
    ("🎸", "guitar"),
    ("🎺", "trumpet"),
    ("🔔", "bell"),
    ("⚓", "anchor"),
    ("🎧", "headphones"),
    ("📁", "folder"),
    ("📌", "pin"),
];

/// A derived short authentication string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sas {
    emoji_indices: [u8; EMOJI_COUNT],
    decimals: [u16; DECIMAL_COUNT],
}

impl Sas {
    /// Emoji rendering: `EMOJI_COUNT` (symbol, name) pairs.
    pub fn emoji(&self) -> [(&'static str, &'static str); EMOJI_COUNT] {
        self.emoji_indices.map(|i| EMOJI[usize::from(i)])
    }

    /// Decimal rendering: three numbers in `1000..=9999`.
    pub fn decimals(&self) -> [u16; DECIMAL_COUNT] {
        self.decimals
    }

    /// Human-readable one-line rendering, e.g. for logs and UI fallbacks.
    pub fn to_display_string(&self) -> String {
        let emoji: Vec<&str> = self.emoji().iter().map(|(symbol, _)| *symbol).collect();
        let decimals: Vec<String> = self.decimals.iter().map(ToString::to_string).collect();
        format!("{} ({})", emoji.join(" "), decimals.join("-"))
    }
}

/// Derive the SAS for a channel.
///
/// `channel_secret` is the established channel's shared secret;
/// `local_identity` and `remote_identity` are the X25519 identity public
/// keys of the two ends. The identity keys are folded in sorted order so
/// both ends derive identical bytes regardless of which one calls this.
pub fn derive_sas(
    channel_secret: &[u8; 32],
    local_identity: &[u8; 32],
    remote_identity: &[u8; 32],
) -> Sas {
    let (first, second) = if local_identity <= remote_identity {
        (local_identity, remote_identity)
    } else {
        (remote_identity, local_identity)
    };

    let mut info = Vec::with_capacity(SAS_INFO.len() + 64);
    info.extend_from_slice(SAS_INFO);
    info.extend_from_slice(first);
    info.extend_from_slice(second);

    // 6 bytes cover 7x 6-bit emoji indices; 6 more cover 3x u16 decimals
    let hk = Hkdf::<Sha256>::new(None, channel_secret);
    let mut bytes = [0u8; 12];
    let Ok(()) = hk.expand(&info, &mut bytes) else {
        unreachable!("12 bytes is a valid HKDF-SHA256 output length");
    };

    let mut emoji_indices = [0u8; EMOJI_COUNT];
    let bits = u64::from_be_bytes([
        0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
    ]);
    for (i, index) in emoji_indices.iter_mut().enumerate() {
        // Consecutive 6-bit windows of the 42 most significant derived bits
        *index = ((bits >> (42 - 6 * i)) & 0x3F) as u8;
    }

    let mut decimals = [0u16; DECIMAL_COUNT];
    for (i, value) in decimals.iter_mut().enumerate() {
        let raw = u16::from_be_bytes([bytes[6 + 2 * i], bytes[7 + 2 * i]]);
        *value = raw % 9000 + 1000;
    }

    Sas { emoji_indices, decimals }
}
