use anyhow::{bail, Context, Result};
use figment::{providers::Format, Figment};
use serde::{de::DeserializeOwned, Serialize};
use std::{marker::PhantomData, path::PathBuf};

/// The builder we use to build Config
#[derive(Debug)]
pub struct ConfigBuilder<CONFIG, ARG> {
    pub cli_env_args: ARG,
    _config: PhantomData<CONFIG>,
}

pub trait CliEnvExt: Serialize + DeserializeOwned + Default + std::fmt::Debug {
    // e.g. "FNBRIDGE"
    const ENV_VAR_PREFIX: &'static str;

    // The section identifier in the TOML file, e.g. "fnbridge"
    const TOML_IDENTIFIER: &'static str;

    // whether to print debug messages during config loading
    const PRINT_DEBUG_MSGS: bool = false;

    // an optional argument to specify the home directory
    // if not supplied, config will try a series of fallbacks
    fn home_dir(&self) -> Option<PathBuf>;

    // an optional path to a dotenv file, loaded before anything else
    fn dotenv_path(&self) -> Option<PathBuf>;

    fn merge_cli_env_args(&self) -> Result<Self> {
        let env_prefix = format!("{}_", Self::ENV_VAR_PREFIX);

        let merged = Figment::new()
            .merge(figment::providers::Env::prefixed(&env_prefix))
            .merge(figment::providers::Serialized::defaults(self))
            .extract()?;

        Ok(merged)
    }

    fn env_var(name: &str) -> Option<String> {
        std::env::var(format!("{}_{name}", Self::ENV_VAR_PREFIX)).ok()
    }
}

pub trait ConfigExt: Serialize + DeserializeOwned + Default + std::fmt::Debug {
    // e.g. "fnbridge.toml"
    const FILENAME: &'static str;

    // directory name used for the per-user and system fallbacks, e.g. ~/.config/fnbridge
    const DIRNAME: &'static str;

    fn log_levels(&self) -> impl Iterator<Item = &str>;

    fn tracing_env_filter(&self) -> Result<tracing_subscriber::EnvFilter> {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in self.log_levels() {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => bail!("{}: {}", err, directive),
            }
        }

        Ok(filter)
    }
}

impl<CONFIG: ConfigExt, ARG: CliEnvExt> ConfigBuilder<CONFIG, ARG> {
    pub fn new(cli_env_args: ARG) -> Self {
        Self {
            cli_env_args,
            _config: PhantomData,
        }
    }

    pub fn build(self) -> Result<CONFIG> {
        // dotenv goes first, it may set the env vars that locate the config file
        let mut dotenv_paths = Vec::new();

        if let Some(dotenv_path) = self.cli_env_args.dotenv_path() {
            dotenv_paths.push(dotenv_path);
        }

        if let Some(dotenv_path) = ARG::env_var("DOTENV") {
            dotenv_paths.push(PathBuf::from(dotenv_path));
        }

        dotenv_paths.push(std::env::current_dir()?.join(".env"));

        for dotenv_path in dotenv_paths {
            if ARG::PRINT_DEBUG_MSGS {
                eprintln!("Loading env vars from {}", dotenv_path.display());
            }
            if dotenv_path.exists() {
                if let Err(e) = dotenvy::from_path(&dotenv_path) {
                    bail!("Error loading dotenv file {}: {}", dotenv_path.display(), e);
                }
            }
        }

        // first merge the cli and env vars
        let cli_env_args = self.cli_env_args.merge_cli_env_args()?;

        let home_dir = cli_env_args
            .home_dir()
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).to_string()));

        // then get the filepath for our file-based config
        let filepath = ConfigFilePath::new(CONFIG::FILENAME, CONFIG::DIRNAME, home_dir.clone())
            .with_home_env_var(format!("{}_HOME", ARG::ENV_VAR_PREFIX))
            .into_path()
            .context(format!(
                "Error getting config file path (filename: {}, homedir: {:?})",
                CONFIG::FILENAME,
                home_dir
            ))?;

        if ARG::PRINT_DEBUG_MSGS {
            eprintln!("Loading config from {}", filepath.display());
        }

        let figment = Figment::new()
            // Start with the default values as the base
            .merge(figment::providers::Serialized::defaults(CONFIG::default()))
            // Then add default section from TOML
            .merge(Figment::from(
                figment::providers::Toml::file(&filepath).nested(),
            ))
            // Then add specific section, overriding globals where needed
            .merge(
                Figment::from(figment::providers::Toml::file(&filepath).nested())
                    .select(ARG::TOML_IDENTIFIER),
            )
            // Finally override with cli/env args
            .merge(figment::providers::Serialized::defaults(cli_env_args));

        Ok(figment.extract()?)
    }
}

// a helper to try a series of fallback paths, looking for a config file
#[derive(Clone, Debug)]
pub struct ConfigFilePath {
    // the filename to look for in each directory, e.g. "fnbridge.toml"
    pub filename: String,
    // the directory name used under per-user and system locations
    pub dirname: String,
    // the optional directory set via direct args or env
    pub arg_env_dir: Option<PathBuf>,
    // a literal env var naming a directory, e.g. FNBRIDGE_HOME
    pub home_env_var: Option<String>,
}

impl ConfigFilePath {
    pub fn new(filename: impl ToString, dirname: impl ToString, arg_env_dir: Option<PathBuf>) -> Self {
        Self {
            filename: filename.to_string(),
            dirname: dirname.to_string(),
            arg_env_dir,
            home_env_var: None,
        }
    }

    pub fn with_home_env_var(mut self, name: impl ToString) -> Self {
        self.home_env_var = Some(name.to_string());
        self
    }

    pub fn into_path(self) -> Option<PathBuf> {
        self.into_possible().into_iter().find(|path| path.exists())
    }

    // tries a series of fallbacks, in order
    pub fn into_possible(self) -> Vec<PathBuf> {
        let Self {
            filename,
            dirname,
            arg_env_dir,
            home_env_var,
        } = self;

        let mut dirs = Vec::new();

        // explicit, e.g. --home /foo
        if let Some(dir) = arg_env_dir {
            dirs.push(dir);
        }

        if let Some(dir) = home_env_var.and_then(|name| std::env::var(name).ok()) {
            dirs.push(dir.into());
        }

        // ./{filename}
        if let Ok(dir) = std::env::current_dir() {
            dirs.push(dir);
        }

        // ~/.{dirname}/{filename}
        if let Some(dir) = dirs::home_dir().map(|dir| dir.join(format!(".{dirname}"))) {
            dirs.push(dir);
        }

        // platform config dir, e.g. ~/.config/fnbridge or ~/Library/Application Support/fnbridge
        if let Some(dir) = dirs::config_dir().map(|dir| dir.join(&dirname)) {
            dirs.push(dir);
        }

        if let Some(dir) = std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .map(|dir| dir.join(&dirname))
        {
            dirs.push(dir);
        }

        if let Some(dir) = dirs::home_dir().map(|dir| dir.join(".config").join(&dirname)) {
            dirs.push(dir);
        }

        dirs.push(PathBuf::from("/etc").join(&dirname));

        let mut all_files: Vec<PathBuf> = dirs.into_iter().map(|dir| dir.join(&filename)).collect();

        all_files.dedup();

        all_files
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use serde::{Deserialize, Serialize};

    use super::{CliEnvExt, ConfigBuilder, ConfigExt, ConfigFilePath};
    use crate::serde::deserialize_vec_string;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    struct TestConfig {
        pub port: u16,
        pub name: String,
        pub log_level: Vec<String>,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                port: 8000,
                name: "default".to_string(),
                log_level: vec!["info".to_string()],
            }
        }
    }

    impl ConfigExt for TestConfig {
        const FILENAME: &'static str = "utils-test.toml";
        const DIRNAME: &'static str = "utils-test";

        fn log_levels(&self) -> impl Iterator<Item = &str> {
            self.log_level.iter().map(|s| s.as_str())
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct TestCliEnv {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub home: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub dotenv: Option<PathBuf>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        #[serde(deserialize_with = "deserialize_vec_string")]
        pub log_level: Vec<String>,
    }

    impl CliEnvExt for TestCliEnv {
        const ENV_VAR_PREFIX: &'static str = "UTILS_TEST";
        const TOML_IDENTIFIER: &'static str = "test";

        fn home_dir(&self) -> Option<PathBuf> {
            self.home.clone()
        }

        fn dotenv_path(&self) -> Option<PathBuf> {
            self.dotenv.clone()
        }
    }

    fn write_config(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TestConfig::FILENAME), contents).unwrap();
        dir
    }

    fn cli_args(home: &tempfile::TempDir) -> TestCliEnv {
        TestCliEnv {
            home: Some(home.path().to_path_buf()),
            // points at a file that does not exist, so no real .env leaks in
            dotenv: Some(home.path().join("does-not-exist")),
            log_level: Vec::new(),
        }
    }

    #[test]
    fn explicit_home_is_tried_first() {
        let paths = ConfigFilePath::new("x.toml", "x", Some("/tmp1".into())).into_possible();
        assert_eq!(paths.first().unwrap(), &PathBuf::from("/tmp1/x.toml"));
        assert_eq!(paths.last().unwrap(), &PathBuf::from("/etc/x/x.toml"));

        temp_env::with_vars([("UTILS_TEST_HOME", Some("/tmp2"))], || {
            let paths = ConfigFilePath::new("x.toml", "x", None)
                .with_home_env_var("UTILS_TEST_HOME")
                .into_possible();
            assert_eq!(paths.first().unwrap(), &PathBuf::from("/tmp2/x.toml"));

            let paths = ConfigFilePath::new("x.toml", "x", Some("/tmp3".into()))
                .with_home_env_var("UTILS_TEST_HOME")
                .into_possible();
            assert_eq!(paths.first().unwrap(), &PathBuf::from("/tmp3/x.toml"));
        });
    }

    #[test]
    fn section_overrides_defaults() {
        let home = write_config(
            r#"
            [default]
            name = "from-default-section"

            [test]
            port = 9001
            "#,
        );

        let config: TestConfig = ConfigBuilder::new(cli_args(&home)).build().unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.name, "from-default-section");
        assert_eq!(config.log_level, ["info"]);
    }

    #[test]
    fn env_then_cli_override_file() {
        let home = write_config(
            r#"
            [test]
            log_level = ["warn"]
            "#,
        );

        let config: TestConfig = temp_env::with_vars(
            [("UTILS_TEST_LOG_LEVEL", Some("debug, foo=trace"))],
            || ConfigBuilder::new(cli_args(&home)).build().unwrap(),
        );
        assert_eq!(config.log_level, ["debug", "foo=trace"]);

        let config: TestConfig = temp_env::with_vars(
            [("UTILS_TEST_LOG_LEVEL", Some("debug"))],
            || {
                let mut args = cli_args(&home);
                args.log_level = vec!["trace".to_string()];
                ConfigBuilder::new(args).build().unwrap()
            },
        );
        assert_eq!(config.log_level, ["trace"]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let mut args = cli_args(&home);
        args.home = Some(home.path().join("nowhere"));

        // the fallbacks may still find a file on a developer machine, so only
        // check that nothing panics and an Err carries the filename
        if let Err(err) = ConfigBuilder::<TestConfig, _>::new(args).build() {
            assert!(err.to_string().contains(TestConfig::FILENAME));
        }
    }

    #[test]
    fn bad_log_directive() {
        let config = TestConfig {
            log_level: vec!["foo=notalevel".to_string()],
            ..Default::default()
        };
        assert!(config.tracing_env_filter().is_err());
    }
}
