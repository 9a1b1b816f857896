//! The `txpublish` command: publish files as a new package version.
//!
//! Stages:
//!
//! 1. **pre-publish**: pick the next free `<name>/vNNN` directory and create it
//! 2. **publish**: copy (or move) every source into it, all concurrently
//! 3. **post-publish**: optionally clear write bits and repoint `<name>/latest`
//!
//! Any failure rolls every stage back, leaving the root as it was. The
//! previous `latest` link is parked next to the new one and only deleted
//! once everything else has been committed.

use crate::error::{Error, Result};
use crate::fs::{FilesystemTransaction, Permission, Permissions, ScopedPermissions};
use crate::publish::Publish;
use crate::transaction::RootTransaction;
use crate::validation::{default_package_name, validate_package_name, validate_root, validate_sources};

use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Name of the symlink pointing at the newest version.
pub const LATEST_LINK: &str = "latest";

/// Where the previous `latest` link is parked until the new one exists.
pub const PREVIOUS_LATEST_LINK: &str = ".latest.previous";

#[derive(Parser, Debug, Clone)]
pub struct PublishArgs {
    /// Directory that holds published packages
    pub root: PathBuf,

    /// Files or directories to publish
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Package name (defaults to the file stem of the first source)
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Move sources into the package instead of copying them
    #[arg(long = "move")]
    pub r#move: bool,

    /// Clear the write bits of every published path
    #[arg(long)]
    pub read_only: bool,

    /// Point `<name>/latest` at the new version
    #[arg(long)]
    pub link_latest: bool,

    /// Show what would be published without changing anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,
}

/// Data threaded through the publish stages.
#[derive(Debug, Clone, Default)]
pub struct PackageContext {
    /// Version directory, relative to the root.
    pub version_dir: Option<PathBuf>,
    /// Published paths, relative to the root.
    pub published: Vec<PathBuf>,
    /// Human-readable list of planned actions.
    pub plan: Vec<String>,
}

impl PackageContext {
    fn version_dir(&self) -> Result<&Path> {
        self.version_dir
            .as_deref()
            .ok_or_else(|| Error::Other(anyhow::anyhow!("Version directory was not allocated")))
    }
}

/// Publishes a list of sources as a new version of one package.
pub struct PackagePublish {
    root: PathBuf,
    name: String,
    sources: Vec<PathBuf>,
    move_sources: bool,
    read_only: bool,
    link_latest: bool,
    dry_run: bool,
}

impl PackagePublish {
    pub fn new(args: &PublishArgs) -> Result<Self> {
        let name = match &args.name {
            Some(name) => name.clone(),
            None => default_package_name(&args.sources)?,
        };
        validate_package_name(&name)?;

        Ok(Self {
            root: args.root.clone(),
            name,
            sources: args.sources.clone(),
            move_sources: args.r#move,
            read_only: args.read_only,
            link_latest: args.link_latest,
            dry_run: args.dry_run,
        })
    }

    /// Points `<name>/latest` at `version_dir`, parking an existing link
    /// until the new one is in place.
    fn relink_latest(&self, version_dir: &Path, replaces: bool) -> FilesystemTransaction {
        let latest = Path::new(&self.name).join(LATEST_LINK);
        let previous = Path::new(&self.name).join(PREVIOUS_LATEST_LINK);

        let mut txn = FilesystemTransaction::new(&self.root);
        if replaces {
            txn.move_path(self.root.join(&latest), &previous);
        }
        txn.soft_link_path(version_dir, &latest);
        // Deletion is irreversible, so it is the last action of the run.
        if replaces {
            txn.delete_path(&previous);
        }
        txn
    }

    /// Adds `txn` to the stage, or only records its plan in dry-run mode.
    fn stage(
        &self,
        transaction: &mut RootTransaction,
        context: &mut PackageContext,
        txn: FilesystemTransaction,
        parallel: bool,
    ) {
        context.plan.extend(txn.preview());

        if self.dry_run || txn.is_empty() {
            return;
        }

        if parallel {
            transaction.add_child_parallel(txn);
        } else {
            transaction.add_child(txn);
        }
    }
}

/// Returns the first unused `vNNN` directory name under `package_dir`.
pub async fn next_version(package_dir: &Path) -> Result<String> {
    let mut highest = 0u32;

    let mut entries = match tokio::fs::read_dir(package_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(format_version(1)),
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let number = name
            .to_str()
            .and_then(|name| name.strip_prefix('v'))
            .and_then(|digits| digits.parse::<u32>().ok());

        if let Some(number) = number {
            highest = highest.max(number);
        }
    }

    Ok(format_version(highest + 1))
}

fn format_version(number: u32) -> String {
    format!("v{:03}", number)
}

fn read_only_permissions() -> Permissions {
    let no_write = ScopedPermissions::new(Permission::Unchanged, Permission::Unset, Permission::Unchanged);
    Permissions {
        user: no_write,
        group: no_write,
        other: no_write,
    }
}

#[async_trait]
impl Publish for PackagePublish {
    type Context = PackageContext;

    async fn pre_publish(
        &self,
        transaction: &mut RootTransaction,
        mut context: PackageContext,
    ) -> Result<PackageContext> {
        let version = next_version(&self.root.join(&self.name)).await?;
        let version_dir = Path::new(&self.name).join(version);
        log::debug!("Allocated version directory {}", version_dir.display());

        let mut txn = FilesystemTransaction::new(&self.root);
        txn.create_directory(&version_dir);
        self.stage(transaction, &mut context, txn, false);

        context.version_dir = Some(version_dir);
        Ok(context)
    }

    async fn publish(
        &self,
        transaction: &mut RootTransaction,
        mut context: PackageContext,
    ) -> Result<PackageContext> {
        let version_dir = context.version_dir()?.to_path_buf();

        for source in &self.sources {
            let file_name = source.file_name().ok_or_else(|| {
                Error::Other(anyhow::anyhow!("Source {} has no file name", source.display()))
            })?;
            let target = version_dir.join(file_name);

            let mut txn = FilesystemTransaction::new(&self.root);
            if self.move_sources {
                txn.move_path(source, &target);
            } else {
                txn.copy_path(source, &target);
            }
            self.stage(transaction, &mut context, txn, true);

            context.published.push(target);
        }

        Ok(context)
    }

    async fn post_publish(
        &self,
        transaction: &mut RootTransaction,
        mut context: PackageContext,
    ) -> Result<PackageContext> {
        if self.read_only {
            let mut txn = FilesystemTransaction::new(&self.root);
            for path in &context.published {
                txn.change_owner_permissions(path, None, None, Some(read_only_permissions()));
            }
            self.stage(transaction, &mut context, txn, false);
        }

        if self.link_latest {
            let version_dir = context.version_dir()?.to_path_buf();
            let latest = self.root.join(&self.name).join(LATEST_LINK);
            let replaces = tokio::fs::symlink_metadata(&latest).await.is_ok();

            let txn = self.relink_latest(&version_dir, replaces);
            self.stage(transaction, &mut context, txn, false);
        }

        Ok(context)
    }
}

pub async fn execute(args: PublishArgs) -> Result<()> {
    validate_root(&args.root)?;
    validate_sources(&args.sources)?;

    let publish = PackagePublish::new(&args)?;
    log::debug!(
        "Publishing {} sources as '{}' into {}",
        args.sources.len(),
        publish.name,
        args.root.display()
    );

    let context = match crate::runner::run(&publish, PackageContext::default()).await {
        Ok(context) => context,
        Err(e) => {
            match &e {
                Error::Stage { stage, .. } => eprintln!(
                    "{} {}",
                    format!("The {} stage failed.", stage).red().bold(),
                    "All changes were rolled back.".green()
                ),
                Error::Rollback { stage, cause, .. } => eprintln!(
                    "{} {}\n{}",
                    "Publish failed:".red().bold(),
                    cause,
                    format!("Rolling back the {} stage failed; some changes remain.", stage).yellow()
                ),
                _ => {}
            }
            return Err(e);
        }
    };

    print_summary(&args.root, &publish.name, &context, args.dry_run);
    Ok(())
}

/// Prints the published paths relative to the root.
pub fn print_summary(root: &Path, name: &str, context: &PackageContext, dry_run: bool) {
    if dry_run {
        println!("\n{}", "DRY RUN - No changes will be made".yellow().bold());
        for line in &context.plan {
            println!("   • {}", line.dimmed());
        }
        println!(
            "\n{} {} planned. Run without {} to apply.",
            context.plan.len().to_string().cyan().bold(),
            if context.plan.len() == 1 { "action" } else { "actions" },
            "--dry-run".cyan()
        );
        return;
    }

    let display_path = |path: &Path| -> String {
        let absolute = root.join(path);
        let relative = pathdiff::diff_paths(&absolute, root).unwrap_or(absolute);
        relative.to_string_lossy().replace('\\', "/")
    };

    if let Some(version_dir) = &context.version_dir {
        println!(
            "\n{} {} {}",
            "📦".bold(),
            name.green().bold(),
            display_path(version_dir).dimmed()
        );
    }

    for path in &context.published {
        println!("   {} {}", "✓".green(), display_path(path).dimmed());
    }

    println!(
        "\n{} Successfully published {} {}",
        "✓".green().bold(),
        context.published.len(),
        if context.published.len() == 1 { "path" } else { "paths" }
    );
}
