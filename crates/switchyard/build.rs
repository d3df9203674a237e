//! Build script: render the switchyardd man page for packaging.

use std::{env, fs, io, path::PathBuf};
use time::{OffsetDateTime, format_description::well_known::Iso8601};

const FALLBACK_DATE: &str = "1970-01-01";

fn manual_date() -> String {
    let Ok(raw) = env::var("SOURCE_DATE_EPOCH") else {
        return FALLBACK_DATE.into();
    };

    let Ok(ts) = raw.parse::<i64>() else {
        println!(
            "cargo:warning=Invalid SOURCE_DATE_EPOCH '{raw}'; expected integer seconds since \
             Unix epoch; falling back to {FALLBACK_DATE}"
        );
        return FALLBACK_DATE.into();
    };

    let Ok(dt) = OffsetDateTime::from_unix_timestamp(ts) else {
        println!(
            "cargo:warning=Invalid SOURCE_DATE_EPOCH '{raw}'; not a valid Unix timestamp; \
             falling back to {FALLBACK_DATE}"
        );
        return FALLBACK_DATE.into();
    };

    dt.format(&Iso8601::DATE).unwrap_or_else(|_| {
        println!(
            "cargo:warning=Invalid SOURCE_DATE_EPOCH '{raw}'; formatting failed; falling back \
             to {FALLBACK_DATE}"
        );
        FALLBACK_DATE.into()
    })
}

/// Workspace `target` directory, four levels above
/// `target/{profile}/build/{crate}-{hash}/out`.
fn workspace_target_dir() -> Option<PathBuf> {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR")?);
    out_dir
        .parent()?
        .parent()?
        .parent()?
        .parent()
        .map(PathBuf::from)
}

fn man_dir() -> PathBuf {
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown-target".into());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown-profile".into());
    let base = workspace_target_dir().unwrap_or_else(|| PathBuf::from("target"));
    base.join(format!("generated-man/{target}/{profile}"))
}

fn write_man_page(data: &[u8], dir: &std::path::Path, page_name: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let destination = dir.join(page_name);
    let tmp = dir.join(format!("{page_name}.tmp"));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, &destination)?;
    Ok(destination)
}

fn render(binary_name: &str, version: &str, date: &str) -> String {
    let title = binary_name.to_uppercase();
    format!(
        ".TH \"{title}\" \"8\" \"{date}\" \"{binary_name} {version}\" \"Switchyard\"\n\
.SH NAME\n\
{binary_name} \\- switchyard action-dispatch daemon\n\
.SH SYNOPSIS\n\
.B {binary_name}\n\
[\\fIOPTIONS\\fR]\n\
.SH DESCRIPTION\n\
Serves registered actions over TCP, QUIC and HTTP using the switchyard binary\n\
protocol (versions 2, 3 and 4).\n\
.SH SIGNALS\n\
.TP\n\
.B SIGINT, SIGTERM, SIGQUIT\n\
Stop accepting, finish in-flight requests within the drain budget, exit.\n\
.TP\n\
.B SIGUSR2\n\
Start a successor that inherits every listening socket, then drain once the\n\
successor is ready.\n\
.SH ENVIRONMENT\n\
.TP\n\
.B SWITCHYARD_*\n\
Configuration overrides, for example SWITCHYARD_LOG_FILTER.\n\
.TP\n\
.B SWITCHYARD_INHERITED_FDS\n\
Comma-separated name:fd pairs set by a restarting predecessor.\n"
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=TARGET");
    println!("cargo:rerun-if-env-changed=PROFILE");

    let binary_name = "switchyardd";
    let version = env::var("CARGO_PKG_VERSION").map_err(
        |_| "CARGO_PKG_VERSION must be set by Cargo; cannot render manual page without it.",
    )?;
    let page = render(binary_name, &version, &manual_date());
    let page_name = format!("{binary_name}.8");

    write_man_page(page.as_bytes(), &man_dir(), &page_name)?;

    if let Some(extra_dir) = env::var_os("OUT_DIR") {
        let extra_dir_path = PathBuf::from(extra_dir);
        if let Err(err) = write_man_page(page.as_bytes(), &extra_dir_path, &page_name) {
            println!(
                "cargo:warning=Failed to stage manual page in OUT_DIR ({}): {err}",
                extra_dir_path.display()
            );
        }
    }

    Ok(())
}
