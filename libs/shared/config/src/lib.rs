use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub realtime: RealtimeSettings,
}

/// Tuning knobs for the realtime queue layer. Defaults match the
/// production deployment; override via environment for load tests.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub room_buffer_size: usize,
    pub notification_log_cap: usize,
    pub default_consult_minutes: u32,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(5),
            room_buffer_size: 100,
            notification_log_cap: 50,
            default_consult_minutes: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            realtime: RealtimeSettings {
                max_reconnect_attempts: env_u32("QUEUE_RECONNECT_ATTEMPTS", 5),
                reconnect_base_delay: Duration::from_secs(env_u64("QUEUE_RECONNECT_BASE_SECS", 1)),
                reconnect_max_delay: Duration::from_secs(env_u64("QUEUE_RECONNECT_MAX_SECS", 5)),
                room_buffer_size: env_u64("QUEUE_ROOM_BUFFER", 100) as usize,
                notification_log_cap: env_u64("QUEUE_NOTIFICATION_LOG_CAP", 50) as usize,
                default_consult_minutes: env_u32("QUEUE_DEFAULT_CONSULT_MINUTES", 10),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
