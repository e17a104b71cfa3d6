use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub keypoint_filter: KeypointFilterConfig,
    #[serde(default)]
    pub fitting: FittingConfig,
    #[serde(default)]
    pub post_smooth: PostSmoothConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 仮想カメラの画角（度）
    #[serde(default = "default_fov_deg")]
    pub fov_deg: f64,
    /// 前処理で画像中心に追加するパディング比率
    #[serde(default = "default_pad_ratio")]
    pub pad_ratio: f64,
    /// これを超える画素数のフレームは縮小する
    #[serde(default = "default_max_resolution")]
    pub max_resolution: u64,
    /// コーナー形式BBoxを中心形式へ変換する際の拡大率
    #[serde(default = "default_bbox_scale")]
    pub bbox_scale: f64,
    /// アテンションヒントに使うキーポイントの信頼度閾値
    #[serde(default = "default_keypoint_threshold")]
    pub keypoint_threshold: f32,
    /// キーポイントとメッシュの重畳画像を書き出すか
    #[serde(default)]
    pub visualize: bool,
    /// 出力パラメータのディレクトリ名
    #[serde(default = "default_output_subdir")]
    pub output_subdir: String,
}

fn default_fov_deg() -> f64 { 60.0 }
fn default_pad_ratio() -> f64 { 0.2 }
fn default_max_resolution() -> u64 { 1280 * 720 }
fn default_bbox_scale() -> f64 { 1.5 }
fn default_keypoint_threshold() -> f32 { 0.3 }
fn default_output_subdir() -> String { "smplx_params".to_string() }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fov_deg: default_fov_deg(),
            pad_ratio: default_pad_ratio(),
            max_resolution: default_max_resolution(),
            bbox_scale: default_bbox_scale(),
            keypoint_threshold: default_keypoint_threshold(),
            visualize: false,
            output_subdir: default_output_subdir(),
        }
    }
}

/// One Euro Filter parameters for the 2D keypoint signal
#[derive(Debug, Deserialize, Clone)]
pub struct KeypointFilterConfig {
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f64,
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default = "default_d_cutoff")]
    pub d_cutoff: f64,
}

fn default_min_cutoff() -> f64 { 1.2 }
fn default_beta() -> f64 { 0.3 }
fn default_d_cutoff() -> f64 { 1.0 }

impl Default for KeypointFilterConfig {
    fn default() -> Self {
        Self {
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            d_cutoff: default_d_cutoff(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FittingConfig {
    /// 反復回数 [粗段階, 精段階]
    #[serde(default = "default_steps")]
    pub steps: [usize; 2],
    /// これ未満の信頼度のキーポイントは再投影誤差に含めない
    #[serde(default = "default_fit_confidence")]
    pub confidence_threshold: f64,
    /// 隣接フレーム間の回転差ペナルティ
    #[serde(default = "default_pose_smooth_weight")]
    pub pose_smooth_weight: f64,
    /// 隣接フレーム間の並進差ペナルティ
    #[serde(default = "default_transl_smooth_weight")]
    pub transl_smooth_weight: f64,
    /// 回帰器の初期姿勢からの乖離ペナルティ（体幹以外の関節）
    #[serde(default = "default_pose_prior_weight")]
    pub pose_prior_weight: f64,
    /// 初期体型からの乖離ペナルティ
    #[serde(default = "default_shape_prior_weight")]
    pub shape_prior_weight: f64,
    /// Levenberg-Marquardt の初期ダンピング
    #[serde(default = "default_initial_damping")]
    pub initial_damping: f64,
    /// 回帰器の2D位置と距離が指す関節（既定: 頭部）
    #[serde(default = "default_anchor_joint")]
    pub anchor_joint: usize,
}

fn default_steps() -> [usize; 2] { [30, 50] }
fn default_fit_confidence() -> f64 { 0.3 }
fn default_pose_smooth_weight() -> f64 { 1e-2 }
fn default_transl_smooth_weight() -> f64 { 1.0 }
fn default_pose_prior_weight() -> f64 { 1e-3 }
fn default_shape_prior_weight() -> f64 { 1e-2 }
fn default_initial_damping() -> f64 { 1e-3 }
fn default_anchor_joint() -> usize { 15 }

impl Default for FittingConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            confidence_threshold: default_fit_confidence(),
            pose_smooth_weight: default_pose_smooth_weight(),
            transl_smooth_weight: default_transl_smooth_weight(),
            pose_prior_weight: default_pose_prior_weight(),
            shape_prior_weight: default_shape_prior_weight(),
            initial_damping: default_initial_damping(),
            anchor_joint: default_anchor_joint(),
        }
    }
}

/// Zero-phase gaussian smoothing of the fitted trajectory
#[derive(Debug, Deserialize, Clone)]
pub struct PostSmoothConfig {
    /// 基準フレームレートでの標準偏差（フレーム数）
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    #[serde(default = "default_reference_fps")]
    pub reference_fps: f64,
    /// カーネル半径 = truncate * sigma
    #[serde(default = "default_truncate")]
    pub truncate: f64,
}

fn default_sigma() -> f64 { 3.0 }
fn default_reference_fps() -> f64 { 30.0 }
fn default_truncate() -> f64 { 4.0 }

impl Default for PostSmoothConfig {
    fn default() -> Self {
        Self {
            sigma: default_sigma(),
            reference_fps: default_reference_fps(),
            truncate: default_truncate(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// ファイルが無ければ既定値
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pipeline.fov_deg, 60.0);
        assert_eq!(config.fitting.steps, [30, 50]);
        assert_eq!(config.keypoint_filter.min_cutoff, 1.2);
        assert_eq!(config.pipeline.max_resolution, 1280 * 720);
        assert_eq!(config.pipeline.output_subdir, "smplx_params");
    }

    #[test]
    fn test_partial_section() {
        let config: Config = toml::from_str(
            r#"
            [fitting]
            steps = [5, 10]

            [pipeline]
            visualize = true
            "#,
        )
        .unwrap();
        assert_eq!(config.fitting.steps, [5, 10]);
        assert_eq!(config.fitting.anchor_joint, 15);
        assert!(config.pipeline.visualize);
        assert_eq!(config.pipeline.pad_ratio, 0.2);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/motion.toml").unwrap();
        assert_eq!(config.post_smooth.sigma, 3.0);
    }
}
