//! # 照片流水线 — 命令行入口
//!
//! 本文件只负责参数解析、日志初始化与调用顺序：
//! 读取文件 → select →（可选）裁剪 →（可选）去背景 → 写出当前显示的图片。
//! 业务逻辑见 `lib.rs` 架构文档。

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use photo_pipeline::error::AppError;
use photo_pipeline::image_pipeline::{
    CropOffset, CropShape, HttpBackgroundRemover, ImageConfig, ImageError, ImagePerformanceProfile, OperationOutcome,
    PipelineCoordinator, PixelRegion, load_from_file,
};

#[derive(Clone, Copy, ValueEnum)]
enum ShapeArg {
    Rect,
    Circle,
}

impl From<ShapeArg> for CropShape {
    fn from(shape: ShapeArg) -> Self {
        match shape {
            ShapeArg::Rect => CropShape::Rect,
            ShapeArg::Circle => CropShape::Circle,
        }
    }
}

#[derive(Parser)]
#[command(name = "photo-pipeline")]
#[command(about = "Normalize, compress, crop and cut out a photo for upload")]
struct Cli {
    /// Photo to process (JPEG, PNG, GIF, WebP, HEIC/HEIF)
    input: PathBuf,

    /// Where to write the result (defaults to the result's own name in the current directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Performance profile: quality | balanced | speed
    #[arg(long)]
    profile: Option<String>,

    /// Compression budget in KiB
    #[arg(long)]
    budget_kb: Option<u64>,

    /// Crop shape; omit to skip cropping
    #[arg(long, value_enum)]
    shape: Option<ShapeArg>,

    /// Crop aspect ratio (width / height), ignored for circles
    #[arg(long, default_value_t = 1.0)]
    aspect: f64,

    /// Crop zoom factor
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,

    /// Horizontal pan in source pixels
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset_x: f64,

    /// Vertical pan in source pixels
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset_y: f64,

    /// Explicit crop region `x,y,width,height`, overrides zoom and pan
    #[arg(long, value_parser = parse_region)]
    region: Option<PixelRegion>,

    /// Replace the background through the removal service
    #[arg(long)]
    remove_bg: bool,

    /// Background-removal service endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token for the background-removal service
    #[arg(long)]
    token: Option<String>,

    /// Print the final pipeline snapshot as JSON
    #[arg(long)]
    json: bool,
}

fn parse_region(value: &str) -> Result<PixelRegion, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid region '{}': {}", value, e))?;

    match parts.as_slice() {
        [x, y, width, height] => Ok(PixelRegion::new(*x, *y, *width, *height)),
        _ => Err(format!("region must be x,y,width,height, got '{}'", value)),
    }
}

fn build_config(cli: &Cli) -> Result<ImageConfig, ImageError> {
    let mut config = ImageConfig::default();
    if let Some(profile) = &cli.profile {
        config.apply_performance_profile(ImagePerformanceProfile::from_str(profile)?);
    }
    if let Some(budget_kb) = cli.budget_kb {
        config.compress_budget_bytes = budget_kb.saturating_mul(1024);
    }
    if let Some(endpoint) = &cli.endpoint {
        config.remove_bg_endpoint = endpoint.clone();
    }
    config.remove_bg_auth_token = cli.token.clone();
    Ok(config)
}

fn ensure_applied(outcome: OperationOutcome, operation: &str) -> Result<(), AppError> {
    match outcome {
        OperationOutcome::Applied => Ok(()),
        OperationOutcome::Superseded => Err(AppError::Superseded(operation.to_string())),
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = build_config(&cli)?;
    let remover = HttpBackgroundRemover::new(&config)?;
    let file = load_from_file(&cli.input, &config)?;
    let coordinator = PipelineCoordinator::new(config, remover)?;

    ensure_applied(coordinator.select(file).await?, "select")?;

    if let Some(shape) = cli.shape {
        let cropper = coordinator.cropper()?;
        let mut session = coordinator.begin_crop(shape.into(), cli.aspect)?;
        let region = match cli.region {
            Some(region) => cropper.report_region(&mut session, region),
            None => cropper.update_region(&mut session, cli.zoom, CropOffset::new(cli.offset_x, cli.offset_y)),
        };
        let (source_width, source_height) = session.source_dimensions();
        log::info!("✂️ 裁剪区域：{:?}（源图 {}x{}）", region, source_width, source_height);
        ensure_applied(coordinator.crop(session).await?, "crop")?;
    }

    if cli.remove_bg {
        ensure_applied(coordinator.toggle_background().await?, "toggle_background")?;
    }

    let snapshot = coordinator.snapshot();
    let Some(active) = snapshot.active_asset.clone() else {
        return Err(ImageError::ValidationFailed("流水线没有产出图片".to_string()).into());
    };

    let output = cli.output.clone().unwrap_or_else(|| PathBuf::from(active.name()));
    std::fs::write(&output, active.bytes())?;
    log::info!(
        "💾 已写出 {} ({}, {}KB)",
        output.display(),
        active.media_type(),
        active.len() / 1024
    );

    if cli.json {
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        println!("{}", json);
    }

    coordinator.teardown();
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        log::error!("❌ 处理失败：{}", err);
        std::process::exit(1);
    }
}
