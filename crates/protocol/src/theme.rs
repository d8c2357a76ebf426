use serde::{Deserialize, Serialize};

/// Semantic color tokens resolved by the renderer's active theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThemeToken {
    // Flame graph, warm hue (wall time)
    FlameHot,
    FlameWarm,
    FlameNeutral,
    // Flame graph, green hue (other metrics)
    MetricHeavy,
    MetricMedium,
    MetricLight,
    /// Fixed color of nodes flagged cold.
    FlameCold,
    /// Fixed color of `(compressed)` placeholder nodes.
    FlameCompressed,
    SearchHighlight,

    // Timeline
    LifetimeBand,
    OffCpuBand,
    GroupLabel,
    WarningText,

    // Floating windows
    WindowHeaderFocused,
    WindowHeaderUnfocused,
    WindowHeaderTextFocused,
    WindowHeaderTextUnfocused,

    // Roofline
    CeilingL1,
    CeilingL2,
    CeilingL3,
    CeilingDram,
    CeilingFp,
    Axis,
    GridLine,

    TextPrimary,
    TextSecondary,
    TextMuted,

    Background,
    Surface,
    Border,
}
