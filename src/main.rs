use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use sealbundle::bundle;
use sealbundle::bundle::version::BundleFormatVersion;
use sealbundle::claims::{self, BearerToken};
use sealbundle::cli::Args;
use sealbundle::constants::{MIME_ADG, MIME_DEPLOY_EVENTS};
use sealbundle::errors::{Error, Result};
use sealbundle::payload;
use sealbundle::upload;
use sealbundle::utils::hash;
use sealbundle::validate;

const ERR_NO_JWT: &str = "bearer token not provided; use -j/--jwt";

fn main() {
    let args = Args::parse();
    initialize_logging(args.verbose);

    if let Err(e) = run(args) {
        error!("Error: {}", e);
        debug!("Failure detail: {:?}", e);
        process::exit(1);
    }
}

/// Initialize logging with the requested verbosity level.
fn initialize_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto).is_err() {
        eprintln!("Failed to initialize logger; continuing without log output");
    }
}

fn run(mut args: Args) -> Result<()> {
    args.apply_extra_args()?;

    let (payload_path, mime) = select_payload(&args)?;

    // Decode the token once; every resolver below works off the parsed
    // claims. Only a --skip-key --encrypt-only run needs no token at all.
    let token = resolve_token(&args)?;
    let token_claims = token.as_ref().map(|t| t.claims());

    if !args.encrypt_only {
        let claims = token_claims.ok_or_else(|| Error::BadInput(ERR_NO_JWT.to_string()))?;
        claims::ensure_not_expired(claims)?;
    }

    let pub_key = match token_claims {
        Some(claims) => claims::resolve_public_key(claims, args.skip_key)?,
        None => None,
    };
    let server = match token_claims {
        Some(claims) if !args.encrypt_only => Some(claims::resolve_server(claims)?.to_string()),
        _ => None,
    };
    let uuid = match token_claims {
        Some(claims) => claims::resolve_uuid(claims, args.skip_key, args.uuid.as_deref())?,
        None => None,
    };

    let version = BundleFormatVersion::from_int(args.bundle_format_version)?;
    let mut stream = payload::stream(&payload_path, version)?;
    let is_archive = stream.is_archive();

    let artifact = bundle::build(
        uuid.as_deref(),
        pub_key,
        &mut stream,
        is_archive,
        mime,
        args.comment_no_sensitive_info.as_deref(),
        args.output.as_deref(),
        version,
    )?;
    stream.close()?;

    let sha256 = hash::sha256_hex(&artifact)?;
    warn!("Important! SHA256 hash of bundle is {}", sha256);

    if args.encrypt_only {
        info!("Wrote bundle to {}", artifact.display());
        return Ok(());
    }

    let token = match token.as_ref() {
        Some(token) => token,
        None => return Err(Error::BadInput(ERR_NO_JWT.to_string())),
    };
    let server = match server {
        Some(server) => server,
        None => return Err(Error::MissingClaim("x-upload-server")),
    };

    let challenge = claims::resolve_challenge(token.claims()).map(str::to_string);
    if challenge.is_some() {
        info!("Using direct upload with encryption challenge verification");
    } else {
        info!("Using direct upload without challenge");
    }

    let filename = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);

    let runtime = Runtime::new().map_err(Error::Io)?;
    runtime.block_on(upload::upload_direct(
        &server,
        token.raw(),
        pub_key,
        &artifact,
        filename.as_deref(),
        challenge.as_deref(),
    ))?;
    Ok(())
}

/// One of --adg / --deployment-events picks the payload path and
/// the MIME token recorded inside the bundle.
fn select_payload(args: &Args) -> Result<(PathBuf, &'static str)> {
    match (&args.adg, &args.deployment_events) {
        (Some(dir), None) => {
            validate::validate_adg_dir(dir)?;
            Ok((dir.clone(), MIME_ADG))
        }
        (None, Some(file)) => {
            validate::validate_deploy_events(file)?;
            Ok((file.clone(), MIME_DEPLOY_EVENTS))
        }
        _ => Err(Error::BadInput(
            "must specify exactly one of --adg or --deployment-events".to_string(),
        )),
    }
}

/// The token is needed whenever a key will be used or an upload will
/// occur; only `--skip-key --encrypt-only` runs without one.
fn resolve_token(args: &Args) -> Result<Option<BearerToken>> {
    if args.skip_key && args.encrypt_only {
        return Ok(None);
    }
    let jwt = args
        .jwt
        .as_deref()
        .ok_or_else(|| Error::BadInput(ERR_NO_JWT.to_string()))?;
    Ok(Some(BearerToken::resolve(jwt)?))
}
