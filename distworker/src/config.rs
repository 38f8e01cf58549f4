//! Bootstrap message and the worker configuration derived from it.
//!
//! The controller's first frame carries the bootstrap. Everything the
//! worker and its host need afterwards is held in [`WorkerConfig`] and
//! passed explicitly; the worker process's own environment is never
//! modified. Items observe the worker environment through
//! [`WorkerConfig::env`], which hosts apply to what they spawn.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of the environment variables items see.
pub const ENV_PREFIX: &str = "DISTWORKER";

fn unknown_worker() -> String {
    "?".to_string()
}

/// Per-worker identity and context chosen by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInput {
    #[serde(default = "unknown_worker")]
    pub workerid: String,
    pub testrunuid: String,
    pub workercount: usize,
    /// The controller's own argv; `mainargv[0]` names the program.
    pub mainargv: Vec<String>,
    /// Anything else the controller chose to pass along.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// First message on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub workerinput: WorkerInput,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Replaces the import search path when set.
    #[serde(default)]
    pub change_sys_path: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub testrun_uid: String,
    pub worker_count: usize,
    /// Basename of `mainargv[0]`.
    pub program: String,
    pub args: Vec<String>,
    /// Options with the worker-side overrides applied.
    pub options: Map<String, Value>,
    pub search_path: Vec<PathBuf>,
    /// Whether `search_path` replaces the inherited path instead of extending it.
    pub replace_search_path: bool,
    pub debug: bool,
    /// Absolute; relative `basetemp` options are resolved against the working directory.
    pub basetemp: Option<PathBuf>,
    pub input: WorkerInput,
}

impl WorkerConfig {
    pub fn from_bootstrap(bootstrap: Bootstrap, cwd: &Path) -> Self {
        let Bootstrap {
            workerinput,
            args,
            mut options,
            change_sys_path,
        } = bootstrap;

        // A worker never distributes further or stops for interactive debugging.
        options.insert("looponfail".to_string(), Value::Bool(false));
        options.insert("usepdb".to_string(), Value::Bool(false));
        options.insert("dist".to_string(), Value::from("no"));
        options.insert("distload".to_string(), Value::Bool(false));
        options.insert("numprocesses".to_string(), Value::Null);
        options.insert("maxprocesses".to_string(), Value::Null);

        let debug = options
            .get("debug")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let basetemp = options
            .get("basetemp")
            .and_then(Value::as_str)
            .map(|dir| cwd.join(dir));

        let program = workerinput
            .mainargv
            .first()
            .and_then(|argv0| Path::new(argv0).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "distworker".to_string());

        let (search_path, replace_search_path) = match change_sys_path {
            Some(paths) => (paths, true),
            None => (vec![cwd.to_path_buf()], false),
        };

        Self {
            worker_id: workerinput.workerid.clone(),
            testrun_uid: workerinput.testrunuid.clone(),
            worker_count: workerinput.workercount,
            program,
            args,
            options,
            search_path,
            replace_search_path,
            debug,
            basetemp,
            input: workerinput,
        }
    }

    /// Environment variables every item runs with.
    ///
    /// `DISTWORKER_BASETEMP` is only present when the `basetemp` option is set.
    ///
    /// `inherited_path` is the current value of `DISTWORKER_PATH`, which the
    /// search path is prepended to unless it replaces it.
    pub fn env(&self, inherited_path: Option<OsString>) -> Vec<(String, OsString)> {
        let mut path_entries = self.search_path.clone();
        if !self.replace_search_path
            && let Some(inherited) = inherited_path
        {
            path_entries.extend(std::env::split_paths(&inherited));
        }
        let path = std::env::join_paths(&path_entries).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Search path contains a separator, using first entry only");
            path_entries
                .first()
                .map(|p| p.clone().into_os_string())
                .unwrap_or_default()
        });

        let mut env = vec![
            (
                format!("{ENV_PREFIX}_TESTRUNUID"),
                OsString::from(&self.testrun_uid),
            ),
            (format!("{ENV_PREFIX}_WORKER"), OsString::from(&self.worker_id)),
            (
                format!("{ENV_PREFIX}_WORKER_COUNT"),
                OsString::from(self.worker_count.to_string()),
            ),
            (format!("{ENV_PREFIX}_PATH"), path),
        ];
        if let Some(basetemp) = &self.basetemp {
            env.push((
                format!("{ENV_PREFIX}_BASETEMP"),
                basetemp.clone().into_os_string(),
            ));
        }
        env
    }

    /// [`Self::env`] with the path inherited from this process.
    pub fn process_env(&self) -> Vec<(String, OsString)> {
        self.env(std::env::var_os(format!("{ENV_PREFIX}_PATH")))
    }
}
