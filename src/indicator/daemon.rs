// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ocr-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Indicator render loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use tokio::time;

use super::render::{PixelStrip, Renderer, StripFrame};
use super::SharedIndicator;
use crate::config::IndicatorConfig;

/// Refresh period of frames that are not paced by the animation frequency
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

fn show(strip: &mut dyn PixelStrip, frame: &StripFrame) {
    if let Err(e) = strip.show(&frame.pixels, frame.brightness) {
        error!("Failed to update LED strip: {:#}", e);
    }
}

/// Render `indicator` on `strip` until `running` is cleared
///
/// Settings are sampled once per frame. The strip is blanked before returning.
pub async fn run_indicator(
    indicator: SharedIndicator,
    mut strip: Box<dyn PixelStrip>,
    config: IndicatorConfig,
    running: Arc<AtomicBool>,
) -> Result<()> {
    info!(
        "Starting status indicator on {} LEDs (strip reports {})",
        config.led_count,
        strip.len()
    );
    let mut renderer = Renderer::new(&config);

    while running.load(Ordering::SeqCst) {
        let settings = indicator.settings();
        let frame = renderer.next_frame(&settings);
        show(strip.as_mut(), &frame);

        let delay = if frame.paced {
            settings.period_delay().unwrap_or(FRAME_INTERVAL)
        } else {
            FRAME_INTERVAL
        };
        time::sleep(delay).await;
    }

    show(strip.as_mut(), &renderer.blank());
    info!("Status indicator stopped");
    Ok(())
}
