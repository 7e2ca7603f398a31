//! Math utilities.
use serde::{Deserialize, Serialize};

pub fn lerp(x: f64, y: f64, t: f64) -> f64 {
    x + t * (y - x)
}

/// Cubic hermite spline, as implemented by Unity's `AnimationCurve`
/// (KSP's `FloatCurve`). Keys without explicit tangents get automatic
/// ones from their neighbours.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CurveKey>", into = "Vec<CurveKey>")]
pub struct FloatCurve {
    frames: Vec<HFrame>,
}

/// Serialized form of a curve key.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    pub time: f64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tangents: Option<(f64, f64)>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct HFrame {
    in_tangent: f64,
    out_tangent: f64,
    time: f64,
    value: f64,
    auto_tangent: bool,
}

impl FloatCurve {
    pub fn new() -> Self {
        Self::default()
    }

    /// A curve that evaluates to `value` everywhere.
    pub fn constant(value: f64) -> Self {
        let mut curve = Self::new();
        curve.add(0.0, value);
        curve
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    fn insert(&mut self, frame: HFrame) -> usize {
        // Equal times keep insertion order.
        let i = self.frames.partition_point(|f| f.time <= frame.time);
        self.frames.insert(i, frame);
        i
    }

    pub fn add(&mut self, time: f64, value: f64) {
        let i = self.insert(HFrame {
            in_tangent: 0.0,
            out_tangent: 0.0,
            time,
            value,
            auto_tangent: true,
        });
        self.recompute_tangents(i);
    }

    pub fn add_with_tangents(&mut self, time: f64, value: f64, in_tangent: f64, out_tangent: f64) {
        let i = self.insert(HFrame {
            in_tangent,
            out_tangent,
            time,
            value,
            auto_tangent: false,
        });
        self.recompute_tangents(i);
    }

    fn recompute_tangents(&mut self, i: usize) {
        if self.frames.len() == 1 {
            let only = &mut self.frames[0];
            if only.auto_tangent {
                only.in_tangent = 0.0;
                only.out_tangent = 0.0;
            }
            return;
        }

        self.fix_tangent(i);
        if i != 0 {
            self.fix_tangent(i - 1);
        }
        if i != self.frames.len() - 1 {
            self.fix_tangent(i + 1);
        }
    }

    fn fix_tangent(&mut self, i: usize) {
        let mut current = self.frames[i];
        if !current.auto_tangent {
            return;
        }
        let last = self.frames.len() - 1;

        let mut slope1 = 0.0;
        if i < last {
            let right = self.frames[i + 1];
            slope1 = (right.value - current.value) / (right.time - current.time);
            if i == 0 {
                current.in_tangent = slope1;
                current.out_tangent = slope1;
                self.frames[i] = current;
                return;
            }
        }

        let mut slope2 = 0.0;
        if i > 0 {
            let left = self.frames[i - 1];
            slope2 = (current.value - left.value) / (current.time - left.time);
            if i == last {
                current.in_tangent = slope2;
                current.out_tangent = slope2;
                self.frames[i] = current;
                return;
            }
        }

        let slope = (slope1 + slope2) / 2.0;
        current.in_tangent = slope;
        current.out_tangent = slope;
        self.frames[i] = current;
    }

    fn interpolant(a: &HFrame, b: &HFrame, x: f64) -> f64 {
        let dx = b.time - a.time;
        let t = (x - a.time) / dx;
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        h00 * a.value + h10 * dx * a.out_tangent + h01 * b.value + h11 * dx * b.in_tangent
    }

    /// Evaluates the curve, clamping to the first/last key outside its
    /// range. An empty curve evaluates to zero.
    pub fn evaluate(&self, t: f64) -> f64 {
        let (Some(first), Some(last)) = (self.frames.first(), self.frames.last()) else {
            return 0.0;
        };

        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }

        let hi = self.frames.partition_point(|f| f.time < t);
        let b = &self.frames[hi];
        if b.time == t {
            return b.value;
        }
        Self::interpolant(&self.frames[hi - 1], b, t)
    }
}

impl From<Vec<CurveKey>> for FloatCurve {
    fn from(keys: Vec<CurveKey>) -> Self {
        keys.into_iter().collect()
    }
}

impl From<FloatCurve> for Vec<CurveKey> {
    fn from(curve: FloatCurve) -> Self {
        curve
            .frames
            .iter()
            .map(|f| CurveKey {
                time: f.time,
                value: f.value,
                tangents: (!f.auto_tangent).then_some((f.in_tangent, f.out_tangent)),
            })
            .collect()
    }
}

impl FromIterator<CurveKey> for FloatCurve {
    fn from_iter<I: IntoIterator<Item = CurveKey>>(iter: I) -> Self {
        let mut curve = Self::new();
        for key in iter {
            match key.tangents {
                Some((i, o)) => curve.add_with_tangents(key.time, key.value, i, o),
                None => curve.add(key.time, key.value),
            }
        }
        curve
    }
}

impl FromIterator<(f64, f64)> for FloatCurve {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut curve = Self::new();
        for (time, value) in iter {
            curve.add(time, value);
        }
        curve
    }
}

#[test]
fn curve_hits_keys_and_clamps() {
    let mut curve = FloatCurve::new();
    curve.add_with_tangents(0.0, 320.0, -70.0, -70.0);
    curve.add_with_tangents(1.0, 250.0, -59.9999, -59.9999);
    curve.add_with_tangents(6.0, 0.001, -49.9998, -49.9998);

    assert_eq!(curve.evaluate(-1.0), 320.0);
    assert_eq!(curve.evaluate(0.0), 320.0);
    assert_eq!(curve.evaluate(1.0), 250.0);
    assert_eq!(curve.evaluate(10.0), 0.001);

    let mid = curve.evaluate(0.5);
    assert!(mid < 320.0 && mid > 250.0);
}

#[test]
fn linear_keys_interpolate_linearly() {
    let curve: FloatCurve = [(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)].into_iter().collect();
    assert!((curve.evaluate(0.25) - 0.25).abs() < 1e-12);
    assert!((curve.evaluate(1.5) - 1.5).abs() < 1e-12);
    assert_eq!(FloatCurve::new().evaluate(3.0), 0.0);
    assert_eq!(FloatCurve::constant(4.0).evaluate(100.0), 4.0);
}
