mod compat;
mod extract;
mod fs_utils;
mod pipeline;
mod replace;
mod site_config;
mod staging;

pub use compat::{
    ensure_access_file, minimum_runtime_version, run_compatibility_checks,
    run_compatibility_checks_with_probe, AccessFileState, CheckStatus, CompatCheck,
    CompatibilityReport, RuntimeProbe, ACCESS_FILE_MARKER, OPTIONAL_EXTENSIONS,
    REQUIRED_EXTENSIONS,
};
pub use extract::{extract_archive, normalize_extracted_root, ExtractError};
pub use pipeline::{
    run_install, run_install_with_hooks, run_upgrade, run_upgrade_with_hooks, InstallOutcome,
    InstallRequest, NullReporter, PipelineError, PipelineReporter, Stage, StageError,
    UpgradeMode, UpgradeOutcome, UpgradeRequest,
};
pub use replace::{
    build_replacement_plan, execute_replacement_plan, find_nonstandard_modes, normalize_modes,
    EntryKind, ManualReviewFile, PlanEntry, ReplaceError, ReplacedPath, ReplacementFailure,
    ReplacementPlan, ReplacementReport,
};
pub use site_config::{
    append_config_directives, format_config_directives, run_site_installer,
    run_site_installer_with_runner, verify_database, verify_database_with_runner, AdminSettings,
    DatabaseSettings, SiteSettings, DEFAULT_DB_HOST, DEFAULT_DB_PORT, DEFAULT_TIMEZONE,
};
pub use staging::{sweep_stale_staging, StagingDir};
