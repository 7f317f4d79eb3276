pub struct Icons;

impl Icons {
    pub const POLL: &str = "🗳️";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const STATS: &str = "📊";
    pub const LINK: &str = "🔗";
    pub const DATABASE: &str = "🗄️";
    pub const PERSON: &str = "👤";
    pub const WRENCH: &str = "🔧";
    pub const EMPTY: &str = "∅";
}
