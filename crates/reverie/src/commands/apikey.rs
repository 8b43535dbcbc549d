//! `reverie apikey` - generate, list, and revoke API keys.

use std::io::{self, BufRead, Write};

use anyhow::Context as _;
use clap::{Args, Subcommand};

use reverie_memory::{MetadataStore, Permission};
use reverie_server::generate_key;

use super::{CliError, CmdResult, Context};

/// Default cost factor when none is configured.
const DEFAULT_SALT_ROUNDS: u32 = 12;

#[derive(Subcommand)]
pub enum ApikeyCommand {
    /// Generate a new key; the full key is printed exactly once
    Generate(GenerateArgs),
    /// List issued keys
    List,
    /// Revoke a key by id
    Revoke(RevokeArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Operator-facing name for the key
    #[arg(long)]
    pub name: Option<String>,

    /// Granted permissions (repeatable), e.g. read, write, vectors:read,
    /// vectors:write, personas:read, personas:write, admin
    #[arg(long = "permission", value_name = "PERM")]
    pub permissions: Vec<String>,

    /// Per-key rate limit, requests per minute
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Days until the key expires; omit for no expiry
    #[arg(long)]
    pub expires_in_days: Option<i64>,

    /// Prompt for the fields instead of taking them from flags
    #[arg(long, short)]
    pub interactive: bool,

    /// Hash cost factor (2^n iterations)
    #[arg(long, env = "REVERIE_API_KEY_SALT_ROUNDS")]
    pub salt_rounds: Option<u32>,
}

#[derive(Args)]
pub struct RevokeArgs {
    /// Key id (the `rv_…` prefix of the full key)
    pub id: String,
}

pub fn run(command: ApikeyCommand, ctx: &Context) -> CmdResult {
    let store = MetadataStore::open(&ctx.db_path)
        .with_context(|| format!("opening {}", ctx.db_path))
        .map_err(CliError::Runtime)?;

    match command {
        ApikeyCommand::Generate(args) => generate(args, &store),
        ApikeyCommand::List => list(&store),
        ApikeyCommand::Revoke(args) => revoke(args, &store),
    }
}

fn generate(mut args: GenerateArgs, store: &MetadataStore) -> CmdResult {
    if args.interactive {
        fill_interactively(&mut args)?;
    }

    let name = args
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CliError::Validation("a key name is required (--name)".to_string()))?;

    if args.permissions.is_empty() {
        return Err(CliError::Validation(
            "at least one --permission is required".to_string(),
        ));
    }
    let permissions = args
        .permissions
        .iter()
        .map(|p| Permission::from_str(p).map_err(|e| CliError::Validation(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(days) = args.expires_in_days {
        if days <= 0 {
            return Err(CliError::Validation(
                "--expires-in-days must be positive".to_string(),
            ));
        }
    }

    let salt_rounds = args.salt_rounds.unwrap_or(DEFAULT_SALT_ROUNDS);
    if !(4..=31).contains(&salt_rounds) {
        return Err(CliError::Validation(format!(
            "--salt-rounds {} out of range [4, 31]",
            salt_rounds
        )));
    }

    let (record, plaintext) = generate_key(
        name,
        permissions,
        args.rate_limit,
        args.expires_in_days,
        salt_rounds,
    );
    store
        .put_api_key(&record)
        .context("persisting key")
        .map_err(CliError::Runtime)?;

    println!("key id:   {}", record.id);
    println!("api key:  {}", plaintext);
    println!();
    println!("Store this key now; it cannot be recovered.");
    Ok(())
}

fn fill_interactively(args: &mut GenerateArgs) -> Result<(), CliError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    if args.name.is_none() {
        args.name = Some(prompt(&mut lines, "Key name")?);
    }
    if args.permissions.is_empty() {
        let raw = prompt(&mut lines, "Permissions (comma-separated)")?;
        args.permissions = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if args.rate_limit.is_none() {
        let raw = prompt(&mut lines, "Rate limit rpm (blank for global)")?;
        if !raw.is_empty() {
            args.rate_limit = Some(raw.parse().map_err(|_| {
                CliError::Validation(format!("bad rate limit '{}'", raw))
            })?);
        }
    }
    if args.expires_in_days.is_none() {
        let raw = prompt(&mut lines, "Expires in days (blank for never)")?;
        if !raw.is_empty() {
            args.expires_in_days = Some(raw.parse().map_err(|_| {
                CliError::Validation(format!("bad expiry '{}'", raw))
            })?);
        }
    }
    Ok(())
}

fn prompt(
    lines: &mut std::io::Lines<std::io::StdinLock<'_>>,
    label: &str,
) -> Result<String, CliError> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let line = lines
        .next()
        .transpose()
        .map_err(|e| CliError::Runtime(e.into()))?
        .unwrap_or_default();
    Ok(line.trim().to_string())
}

fn list(store: &MetadataStore) -> CmdResult {
    let keys = store
        .list_api_keys()
        .context("listing keys")
        .map_err(CliError::Runtime)?;

    if keys.is_empty() {
        println!("no api keys issued");
        return Ok(());
    }

    for key in keys {
        let state = if key.revoked {
            "revoked"
        } else if !key.is_usable(chrono::Utc::now()) {
            "expired"
        } else {
            "active"
        };
        let permissions: Vec<&str> = key.permissions.iter().map(|p| p.as_str()).collect();
        println!(
            "{}  {:8}  {:24}  [{}]  rpm={}",
            key.id,
            state,
            key.name,
            permissions.join(", "),
            key.rate_limit_rpm
                .map(|r| r.to_string())
                .unwrap_or_else(|| "global".to_string()),
        );
    }
    Ok(())
}

fn revoke(args: RevokeArgs, store: &MetadataStore) -> CmdResult {
    store.revoke_api_key(&args.id).map_err(|e| match e {
        reverie_memory::MemoryError::NotFound(message) => CliError::Validation(message),
        other => CliError::Runtime(other.into()),
    })?;
    println!("revoked {}", args.id);
    Ok(())
}
