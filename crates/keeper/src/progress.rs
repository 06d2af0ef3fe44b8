use indicatif::{ProgressBar, ProgressStyle};
use keeper_core::{Progress, ProgressSender};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BAR_LENGTH: u64 = 1000;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold} [{bar:40.cyan/blue}] {msg}")
        .map(|style| style.progress_chars("━╸━"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn bar_position(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64
}

/// Draws engine progress events until every sender is dropped.
pub struct ProgressRenderer {
    handle: JoinHandle<()>,
}

impl ProgressRenderer {
    pub fn spawn(prefix: impl Into<String>) -> (ProgressSender, Self) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();
        let bar = ProgressBar::new(BAR_LENGTH);
        bar.set_style(bar_style());
        bar.set_prefix(prefix.into());

        let handle = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                bar.set_position(bar_position(progress.fraction));
                bar.set_message(progress.status);
            }
            bar.finish_and_clear();
        });
        (tx, Self { handle })
    }

    /// Wait for the bar to be cleared. Drop the sender first.
    pub async fn finish(self) {
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use keeper_core::Progress;

    use super::{BAR_LENGTH, ProgressRenderer, bar_position};

    #[test]
    fn positions_scale_and_clamp() {
        assert_eq!(bar_position(0.0), 0);
        assert_eq!(bar_position(0.5), BAR_LENGTH / 2);
        assert_eq!(bar_position(1.0), BAR_LENGTH);
        assert_eq!(bar_position(7.0), BAR_LENGTH);
        assert_eq!(bar_position(-1.0), 0);
    }

    #[tokio::test]
    async fn renderer_finishes_when_sender_drops() {
        let (tx, renderer) = ProgressRenderer::spawn("main");
        tx.send(Progress::new(0.5, "Downloading v1... 50%"))
            .expect("renderer should be listening");
        drop(tx);

        renderer.finish().await;
    }
}
