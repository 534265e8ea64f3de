use anyhow::Result;
use layercache_redis::CacheSettings;

pub fn show(settings: &CacheSettings) -> Result<()> {
    print!("{}", settings.to_toml()?);
    Ok(())
}
