use app::anyhow::Result;
use app::RenderConfig;
use ray_query::{RayQuery, APP_NAME};

fn main() -> Result<()> {
    let result = app::run::<RayQuery>(APP_NAME, RenderConfig::default());
    if let Err(e) = &result {
        log::error!("{e:#}");
    }

    result
}
