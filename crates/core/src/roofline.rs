//! Cache-aware roofline plot.

use std::sync::Arc;

use profview_protocol::{
    Point, Rect, RenderCommand, RooflineModel, RooflinePayload, TextAlign, ThemeToken,
};
use serde::{Deserialize, Serialize};

/// Lower end of the arithmetic-intensity axis, in flop/byte.
pub const MIN_INTENSITY: f64 = 1.0 / 256.0;
const SAMPLES: usize = 100;
const MARGIN: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    L1,
    L2,
    L3,
    Dram,
    /// Peak without FMA, drawn as a dashed flat line.
    Fp,
}

impl Bound {
    pub const ALL: [Bound; 5] = [Bound::L1, Bound::L2, Bound::L3, Bound::Dram, Bound::Fp];

    pub fn label(self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
            Self::Dram => "DRAM",
            Self::Fp => "FP",
        }
    }

    fn theme(self) -> ThemeToken {
        match self {
            Self::L1 => ThemeToken::CeilingL1,
            Self::L2 => ThemeToken::CeilingL2,
            Self::L3 => ThemeToken::CeilingL3,
            Self::Dram => ThemeToken::CeilingDram,
            Self::Fp => ThemeToken::CeilingFp,
        }
    }

    fn bandwidth(self, model: &RooflineModel) -> Option<f64> {
        match self {
            Self::L1 => Some(model.l1.gbps),
            Self::L2 => Some(model.l2.gbps),
            Self::L3 => Some(model.l3.gbps),
            Self::Dram => Some(model.dram.gbps),
            Self::Fp => None,
        }
    }
}

/// Which ceilings are drawn. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub l1: bool,
    pub l2: bool,
    pub l3: bool,
    pub dram: bool,
    pub fp: bool,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            l1: true,
            l2: true,
            l3: true,
            dram: true,
            fp: true,
        }
    }
}

impl Bounds {
    pub fn is_enabled(&self, bound: Bound) -> bool {
        match bound {
            Bound::L1 => self.l1,
            Bound::L2 => self.l2,
            Bound::L3 => self.l3,
            Bound::Dram => self.dram,
            Bound::Fp => self.fp,
        }
    }

    pub fn toggle(&mut self, bound: Bound) {
        let flag = match bound {
            Bound::L1 => &mut self.l1,
            Bound::L2 => &mut self.l2,
            Bound::L3 => &mut self.l3,
            Bound::Dram => &mut self.dram,
            Bound::Fp => &mut self.fp,
        };
        *flag = !*flag;
    }
}

/// One ceiling of the selected model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    /// `min(x * gbps, peak)`.
    Memory { bound: Bound, gbps: f64, peak: f64 },
    /// Constant `gflops`.
    Flat { gflops: f64 },
}

impl Curve {
    pub fn eval(&self, x: f64) -> f64 {
        match *self {
            Self::Memory { gbps, peak, .. } => (x * gbps).min(peak),
            Self::Flat { gflops } => gflops,
        }
    }

    pub fn bound(&self) -> Bound {
        match *self {
            Self::Memory { bound, .. } => bound,
            Self::Flat { .. } => Bound::Fp,
        }
    }

    pub fn dashed(&self) -> bool {
        matches!(self, Self::Flat { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RooflinePanel {
    payload: Arc<RooflinePayload>,
    model: Option<usize>,
    bounds: Bounds,
    width: f64,
    height: f64,
}

impl RooflinePanel {
    pub fn new(payload: Arc<RooflinePayload>, width: f64, height: f64) -> Self {
        Self {
            payload,
            model: None,
            bounds: Bounds::default(),
            width,
            height,
        }
    }

    /// ISA names to choose a model from, in payload order.
    pub fn model_names(&self) -> Vec<&str> {
        self.payload.models.iter().map(|m| m.isa.as_str()).collect()
    }

    /// Pick a model. Out-of-range indices are ignored.
    pub fn select_model(&mut self, index: usize) -> bool {
        if index < self.payload.models.len() {
            self.model = Some(index);
            true
        } else {
            false
        }
    }

    pub fn selected(&self) -> Option<&RooflineModel> {
        self.model.and_then(|i| self.payload.models.get(i))
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn toggle(&mut self, bound: Bound) {
        self.bounds.toggle(bound);
    }

    /// `"L1: on"`-style state of each toggle.
    pub fn bound_labels(&self) -> Vec<String> {
        Bound::ALL
            .iter()
            .map(|&b| {
                let state = if self.bounds.is_enabled(b) { "on" } else { "off" };
                format!("{}: {state}", b.label())
            })
            .collect()
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    /// Enabled ceilings of the selected model.
    pub fn curves(&self) -> Vec<Curve> {
        let Some(model) = self.selected() else {
            return Vec::new();
        };
        let peak = model.fp_fma.gflops;
        Bound::ALL
            .iter()
            .filter(|&&b| self.bounds.is_enabled(b))
            .map(|&b| match b.bandwidth(model) {
                Some(gbps) => Curve::Memory {
                    bound: b,
                    gbps,
                    peak,
                },
                None => Curve::Flat {
                    gflops: model.fp.gflops,
                },
            })
            .collect()
    }

    /// Intensity at which the slowest enabled memory level meets the FMA peak.
    /// With no memory level enabled, all levels count.
    pub fn knee(&self) -> Option<f64> {
        let model = self.selected()?;
        let levels = [Bound::L1, Bound::L2, Bound::L3, Bound::Dram];
        let slowest = |only_enabled: bool| {
            levels
                .iter()
                .filter(|&&b| !only_enabled || self.bounds.is_enabled(b))
                .filter_map(|&b| b.bandwidth(model))
                .reduce(f64::min)
        };
        let gbps = slowest(true).or_else(|| slowest(false))?;
        Some(model.fp_fma.gflops / gbps)
    }

    pub fn x_domain(&self) -> Option<(f64, f64)> {
        self.knee().map(|k| (MIN_INTENSITY, 1.5 * k))
    }

    pub fn y_domain(&self) -> Option<(f64, f64)> {
        self.selected().map(|m| (0.0, 1.25 * m.fp_fma.gflops))
    }

    /// Label/value rows describing the selected model.
    pub fn details(&self) -> Option<Vec<(&'static str, String)>> {
        let m = self.selected()?;
        let p = &self.payload;
        Some(vec![
            ("Precision", m.precision.clone()),
            ("Threads", m.threads.clone()),
            ("Loads", m.loads.clone()),
            ("Stores", m.stores.clone()),
            ("Interleaved", m.interleaved.clone()),
            ("L1 bytes", p.l1.clone()),
            ("L2 bytes", p.l2.clone()),
            ("L3 bytes", p.l3.clone()),
            ("DRAM bytes", m.dram_bytes.clone()),
        ])
    }

    /// Plot with a logarithmic x axis. Empty until a model is selected.
    pub fn render(&self) -> Vec<RenderCommand> {
        let (Some((x0, x1)), Some((_, y1))) = (self.x_domain(), self.y_domain()) else {
            return Vec::new();
        };
        let plot = Rect::new(
            MARGIN,
            MARGIN / 2.0,
            (self.width - 1.5 * MARGIN).max(1.0),
            (self.height - 1.5 * MARGIN).max(1.0),
        );
        let (lx0, lx1) = (x0.log10(), x1.log10());
        let to_px = |x: f64, y: f64| {
            let fx = if lx1 > lx0 {
                (x.log10() - lx0) / (lx1 - lx0)
            } else {
                0.0
            };
            let fy = if y1 > 0.0 { y / y1 } else { 0.0 };
            Point::new(plot.x + fx * plot.w, plot.y + plot.h - fy * plot.h)
        };

        let mut out = vec![
            RenderCommand::BeginGroup {
                id: "roofline".into(),
                label: Some("Cache-aware roofline model".into()),
            },
            RenderCommand::SetClip { rect: plot },
        ];

        for curve in self.curves() {
            let mut xs: Vec<f64> = (0..=SAMPLES)
                .map(|i| 10f64.powf(lx0 + (lx1 - lx0) * i as f64 / SAMPLES as f64))
                .collect();
            if let Curve::Memory { gbps, peak, .. } = curve
                && gbps > 0.0
            {
                let corner = peak / gbps;
                if corner > x0 && corner < x1 {
                    xs.push(corner);
                    xs.sort_by(f64::total_cmp);
                }
            }
            for pair in xs.windows(2) {
                out.push(RenderCommand::DrawLine {
                    from: to_px(pair[0], curve.eval(pair[0])),
                    to: to_px(pair[1], curve.eval(pair[1])),
                    color: curve.bound().theme(),
                    width: 1.5,
                    dashed: curve.dashed(),
                });
            }
        }

        out.push(RenderCommand::ClearClip);
        out.extend(self.axes(plot));
        for x in log2_ticks(x0, x1) {
            let at = to_px(x, 0.0);
            let end = Point::new(at.x, at.y + TICK);
            out.extend(tick(at, end, intensity_label(x), TextAlign::Center));
        }
        for y in linear_ticks(y1) {
            let at = to_px(x0, y);
            let end = Point::new(at.x - TICK, at.y);
            out.extend(tick(at, end, format!("{y}"), TextAlign::Right));
        }
        out.push(RenderCommand::EndGroup);
        out
    }

    fn axes(&self, plot: Rect) -> Vec<RenderCommand> {
        let origin = Point::new(plot.x, plot.y + plot.h);
        vec![
            RenderCommand::DrawLine {
                from: origin,
                to: Point::new(plot.x + plot.w, origin.y),
                color: ThemeToken::Axis,
                width: 1.0,
                dashed: false,
            },
            RenderCommand::DrawLine {
                from: origin,
                to: Point::new(plot.x, plot.y),
                color: ThemeToken::Axis,
                width: 1.0,
                dashed: false,
            },
            RenderCommand::DrawText {
                position: Point::new(plot.x + plot.w / 2.0, origin.y + MARGIN * 0.6),
                text: "Arithmetic intensity (flop/byte)".into(),
                color: ThemeToken::TextSecondary,
                font_size: 11.0,
                align: TextAlign::Center,
            },
            RenderCommand::DrawText {
                position: Point::new(4.0, plot.y + 10.0),
                text: "Performance (Gflop/s)".into(),
                color: ThemeToken::TextSecondary,
                font_size: 11.0,
                align: TextAlign::Left,
            },
        ]
    }
}

const TICK: f64 = 4.0;

/// Powers of two inside `[lo, hi]`, thinned to at most ten.
fn log2_ticks(lo: f64, hi: f64) -> Vec<f64> {
    if lo.is_nan() || hi.is_nan() || lo <= 0.0 || hi < lo {
        return Vec::new();
    }
    let (first, last) = (lo.log2().ceil() as i32, hi.log2().floor() as i32);
    let count = (last - first + 1).max(0) as usize;
    (first..=last)
        .step_by(count.div_ceil(10).max(1))
        .map(|e| 2f64.powi(e))
        .collect()
}

/// Round steps (1, 2 or 5 times a power of ten) from 0 up to `hi`.
fn linear_ticks(hi: f64) -> Vec<f64> {
    if hi.is_nan() || hi <= 0.0 {
        return Vec::new();
    }
    let raw = hi / 5.0;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = match raw / magnitude {
        r if r < 1.5 => 1.0,
        r if r < 3.0 => 2.0,
        r if r < 7.0 => 5.0,
        _ => 10.0,
    } * magnitude;
    (0..)
        .map(|i| i as f64 * step)
        .take_while(|v| *v <= hi)
        .collect()
}

fn intensity_label(x: f64) -> String {
    if x >= 1.0 {
        format!("{x}")
    } else {
        format!("1/{}", (1.0 / x).round())
    }
}

fn tick(from: Point, to: Point, label: String, align: TextAlign) -> [RenderCommand; 2] {
    let position = match align {
        TextAlign::Right => Point::new(to.x - 2.0, to.y + 4.0),
        _ => Point::new(to.x, to.y + 10.0),
    };
    [
        RenderCommand::DrawLine {
            from,
            to,
            color: ThemeToken::Axis,
            width: 1.0,
            dashed: false,
        },
        RenderCommand::DrawText {
            position,
            text: label.into(),
            color: ThemeToken::TextMuted,
            font_size: 10.0,
            align,
        },
    ]
}
