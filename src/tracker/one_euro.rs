use crate::config::KeypointFilterConfig;
use crate::pose::{Keypoint, Keypoints2D};

/// Low-pass filter component
struct LowPassFilter {
    prev: Option<f32>,
}

impl LowPassFilter {
    fn new() -> Self {
        Self { prev: None }
    }

    fn filter(&mut self, value: f32, alpha: f32) -> f32 {
        match self.prev {
            Some(prev) => {
                let result = alpha * value + (1.0 - alpha) * prev;
                self.prev = Some(result);
                result
            }
            None => {
                self.prev = Some(value);
                value
            }
        }
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}

/// alpha = 1 / (1 + tau/Te), tau = 1/(2*pi*fc)
fn smoothing_factor(te: f32, cutoff: f32) -> f32 {
    let r = 2.0 * std::f32::consts::PI * cutoff * te;
    r / (r + 1.0)
}

/// One Euro Filter for a single scalar value
struct ScalarFilter {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
    x_filter: LowPassFilter,
    dx_filter: LowPassFilter,
    prev_value: Option<f32>,
}

impl ScalarFilter {
    fn new(min_cutoff: f32, beta: f32, d_cutoff: f32) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            x_filter: LowPassFilter::new(),
            dx_filter: LowPassFilter::new(),
            prev_value: None,
        }
    }

    fn filter(&mut self, value: f32, dt: f32) -> f32 {
        let dx = match self.prev_value {
            Some(prev) => (value - prev) / dt,
            None => 0.0,
        };
        self.prev_value = Some(value);

        let edx = self
            .dx_filter
            .filter(dx, smoothing_factor(dt, self.d_cutoff));
        let cutoff = self.min_cutoff + self.beta * edx.abs();
        self.x_filter.filter(value, smoothing_factor(dt, cutoff))
    }

    fn reset(&mut self) {
        self.x_filter.reset();
        self.dx_filter.reset();
        self.prev_value = None;
    }
}

/// 2Dキーポイント列用の One Euro Filter
///
/// サンプリング間隔は動画のフレームレートで固定（実時間は使わない）。
/// x, y のみ平滑化し、信頼度はそのまま通す。状態はセグメントごとに初期化する。
pub struct KeypointSmoother {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
    dt: f32,
    filters: Vec<[ScalarFilter; 2]>,
}

impl KeypointSmoother {
    pub fn new(min_cutoff: f32, beta: f32, d_cutoff: f32, fps: f64) -> Self {
        let dt = if fps > 0.0 { (1.0 / fps) as f32 } else { 1.0 / 30.0 };
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            dt,
            filters: Vec::new(),
        }
    }

    pub fn from_config(config: &KeypointFilterConfig, fps: f64) -> Self {
        Self::new(
            config.min_cutoff as f32,
            config.beta as f32,
            config.d_cutoff as f32,
            fps,
        )
    }

    /// 1フレーム分を平滑化
    pub fn apply(&mut self, frame: &Keypoints2D) -> Keypoints2D {
        while self.filters.len() < frame.len() {
            let (min_cutoff, beta, d_cutoff) = (self.min_cutoff, self.beta, self.d_cutoff);
            self.filters
                .push(std::array::from_fn(|_| ScalarFilter::new(min_cutoff, beta, d_cutoff)));
        }

        let dt = self.dt;
        let points = frame
            .points
            .iter()
            .zip(self.filters.iter_mut())
            .map(|(kp, [fx, fy])| Keypoint {
                x: fx.filter(kp.x, dt),
                y: fy.filter(kp.y, dt),
                confidence: kp.confidence,
            })
            .collect();
        Keypoints2D::new(points)
    }

    /// セグメント全体を先頭から順に平滑化（開始前に状態を初期化）
    pub fn smooth_segment(&mut self, frames: &[Keypoints2D]) -> Vec<Keypoints2D> {
        self.reset();
        frames.iter().map(|f| self.apply(f)).collect()
    }

    pub fn reset(&mut self) {
        for [fx, fy] in &mut self.filters {
            fx.reset();
            fy.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(x: f32, y: f32) -> Keypoints2D {
        Keypoints2D::new(vec![Keypoint::new(x, y, 0.8); 3])
    }

    #[test]
    fn test_smoothing_factor_bounds() {
        // alpha should be between 0 and 1
        for &cutoff in &[0.1, 1.0, 10.0, 100.0] {
            for &te in &[0.001, 0.01, 0.033, 0.1] {
                let alpha = smoothing_factor(te, cutoff);
                assert!(alpha > 0.0 && alpha < 1.0, "alpha={} for te={}, cutoff={}", alpha, te, cutoff);
            }
        }
    }

    #[test]
    fn test_scalar_filter_passthrough_first() {
        let mut f = ScalarFilter::new(1.0, 0.0, 1.0);
        let result = f.filter(5.0, 0.033);
        assert_eq!(result, 5.0);
    }

    #[test]
    fn test_scalar_filter_smooths() {
        let mut f = ScalarFilter::new(1.0, 0.0, 1.0);
        f.filter(0.0, 0.033);
        let result = f.filter(10.0, 0.033);
        assert!(result < 10.0, "Expected smoothing, got {}", result);
        assert!(result > 0.0, "Expected positive value, got {}", result);
    }

    #[test]
    fn test_scalar_filter_high_beta_responsive() {
        let mut f_low_beta = ScalarFilter::new(1.0, 0.0, 1.0);
        let mut f_high_beta = ScalarFilter::new(1.0, 1.0, 1.0);

        f_low_beta.filter(0.0, 0.033);
        f_high_beta.filter(0.0, 0.033);

        let r_low = f_low_beta.filter(10.0, 0.033);
        let r_high = f_high_beta.filter(10.0, 0.033);

        assert!(r_high > r_low, "High beta ({}) should be more responsive than low beta ({})", r_high, r_low);
    }

    #[test]
    fn test_confidence_untouched() {
        let mut smoother = KeypointSmoother::new(1.2, 0.3, 1.0, 30.0);
        smoother.apply(&frame(0.0, 0.0));
        let mut moved = frame(50.0, 50.0);
        moved.points[1].confidence = 0.1;
        let out = smoother.apply(&moved);
        assert!(out.points[0].x < 50.0);
        assert_eq!(out.points[1].confidence, 0.1);
    }

    #[test]
    fn test_deterministic() {
        let frames: Vec<Keypoints2D> = (0..20).map(|i| frame(i as f32 * 3.0, (i % 4) as f32)).collect();
        let a = KeypointSmoother::new(1.2, 0.3, 1.0, 30.0).smooth_segment(&frames);
        let b = KeypointSmoother::new(1.2, 0.3, 1.0, 30.0).smooth_segment(&frames);
        assert_eq!(a, b);
    }

    #[test]
    fn test_segment_reset_independent_of_previous() {
        let seg_a: Vec<Keypoints2D> = (0..15).map(|i| frame(100.0 + i as f32, 40.0)).collect();
        let seg_b: Vec<Keypoints2D> = (0..15).map(|i| frame(500.0 - i as f32 * 2.0, 80.0)).collect();

        let mut shared = KeypointSmoother::new(1.2, 0.3, 1.0, 30.0);
        shared.smooth_segment(&seg_a);
        let after_a = shared.smooth_segment(&seg_b);

        let fresh = KeypointSmoother::new(1.2, 0.3, 1.0, 30.0).smooth_segment(&seg_b);
        assert_eq!(after_a, fresh);
        // 先頭フレームはそのまま
        assert_eq!(after_a[0], seg_b[0]);
    }
}
