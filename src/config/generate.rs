pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGFERRY CONFIGURATION
# =============================================================================
# Each instance runs the same binary. Roles are enabled by which sections are
# present:
#
#   producer:    Watch a directory and ship JSON lines to a collector
#   collector:   Receive batches and store them partitioned by type and date
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logferry/config.yml
#   3. /etc/logferry/config.yml

# =============================================================================
# PRODUCER (optional)
# =============================================================================
producer:
  # Directory scanned at startup and watched for created/renamed files.
  # Files are deleted once every line has been accepted by the collector.
  watch_dir: ~/logferry/outbox
  # Glob matched against file names in watch_dir
  file_pattern: "*.json"
  collector_url: http://127.0.0.1:5275
  # Lines per batch; every line must be a JSON object with a "type" string
  batch_size: 100
  request_timeout: 30s
  retry:
    delay: 1s
    # 1 keeps the delay fixed; 2 doubles it after every failed pass
    multiplier: 1
    max_delay: 60s
    # Omit to retry forever
    # max_attempts: 20
  malformed:
    # 'retry' keeps the bad line and retries the pass (may loop forever)
    # 'quarantine' moves the bad line to quarantine_dir and continues
    policy: retry
    # quarantine_dir: ~/logferry/rejected

# =============================================================================
# COLLECTOR (optional)
# =============================================================================
collector:
  listen: "127.0.0.1:5275"
  # Records land in {root}/{type}/{yyyy-MM-dd}/batch_{id}.json
  root: ~/logferry/store
"#
    .to_string()
}
