use helpline_core::config::{AppConfig, LoadOptions};
use helpline_db::connect_with_settings;
use helpline_db::repositories::{JsonFileTicketRepository, TicketRepository};
use helpline_db::vector::LocalVectorStore;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> super::CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    super::CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime.block_on(async {
                    checks.push(check_primary_store(&config).await);
                    checks.push(check_fallback_store(&config).await);
                    checks.push(check_vector_file(&config).await);
                }),
                Err(error) => checks.push(DoctorCheck {
                    name: "runtime_init",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                }),
            }
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["primary_store", "fallback_store", "vector_file"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// A missing primary is a supported deployment, so it is skipped rather than failed.
async fn check_primary_store(config: &AppConfig) -> DoctorCheck {
    let Some(url) = config.database.url.as_deref() else {
        return DoctorCheck {
            name: "primary_store",
            status: CheckStatus::Skipped,
            details: "no primary database configured; tickets use the file store".to_string(),
        };
    };

    match connect_with_settings(url, config.database.max_connections, config.database.timeout_secs)
        .await
    {
        Ok(pool) => {
            pool.close().await;
            DoctorCheck {
                name: "primary_store",
                status: CheckStatus::Pass,
                details: format!("connected using `{url}`"),
            }
        }
        Err(error) => DoctorCheck {
            name: "primary_store",
            status: CheckStatus::Fail,
            details: format!("failed to connect to primary store: {error}"),
        },
    }
}

async fn check_fallback_store(config: &AppConfig) -> DoctorCheck {
    let data_dir = &config.storage.data_dir;
    if let Err(error) = tokio::fs::create_dir_all(data_dir).await {
        return DoctorCheck {
            name: "fallback_store",
            status: CheckStatus::Fail,
            details: format!("data directory `{}` is not usable: {error}", data_dir.display()),
        };
    }

    let store = JsonFileTicketRepository::new(config.storage.ticket_path());
    match store.ping().await {
        Ok(()) => DoctorCheck {
            name: "fallback_store",
            status: CheckStatus::Pass,
            details: format!("ticket file `{}` readable", store.path().display()),
        },
        Err(error) => DoctorCheck {
            name: "fallback_store",
            status: CheckStatus::Fail,
            details: format!("ticket file `{}` unreadable: {error}", store.path().display()),
        },
    }
}

async fn check_vector_file(config: &AppConfig) -> DoctorCheck {
    let path = config.storage.vector_path();
    match LocalVectorStore::open(&path).await {
        Ok(store) => DoctorCheck {
            name: "vector_file",
            status: CheckStatus::Pass,
            details: format!("{} documents in `{}`", store.len().await, path.display()),
        },
        Err(error) => DoctorCheck {
            name: "vector_file",
            status: CheckStatus::Fail,
            details: format!("vector file `{}` unusable: {error}", path.display()),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
