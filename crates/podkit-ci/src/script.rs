//! Static analysis of inline `run:` scripts.
//!
//! Test jobs download observational data, unpack it, and then call the
//! framework driver. This module recovers those actions from the script text
//! so a plan can show what a job fetches and which test files it runs without
//! executing anything.

use serde::Serialize;

/// Programs recognized as the framework driver.
pub const DEFAULT_DRIVERS: &[&str] = &["mdtf", "mdtf_framework.py"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchTool {
    Curl,
    Wget,
}

/// A remote download found in a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSpec {
    pub tool: FetchTool,
    pub url: String,
    pub scheme: String,
    /// Seconds allowed to establish the connection
    pub connect_timeout: Option<u64>,
    /// Seconds allowed for the whole transfer
    pub max_time: Option<u64>,
    pub retries: Option<u32>,
    pub output: Option<String>,
    /// 1-based line of the command in the script
    pub line: usize,
}

impl FetchSpec {
    /// Both timeouts and a retry count are set, so the step cannot hang.
    pub fn is_bounded(&self) -> bool {
        self.connect_timeout.is_some() && self.max_time.is_some() && self.retries.is_some()
    }

    /// Worst-case wall time in seconds, if bounded.
    pub fn worst_case_secs(&self) -> Option<u64> {
        let per_attempt = self.max_time?;
        let attempts = u64::from(self.retries?) + 1;
        Some(per_attempt.saturating_mul(attempts))
    }
}

/// An archive unpacked by the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub archive: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationKind {
    /// `--version` smoke check
    Version,
    /// `-f <file>`: run the PODs listed in a test configuration
    TestFile { file: String },
    /// `python -m unittest discover`
    UnitTests,
    Other { args: Vec<String> },
}

/// A call to the framework driver (or the unit-test runner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    #[serde(flatten)]
    pub kind: InvocationKind,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScriptAnalysis {
    pub fetches: Vec<FetchSpec>,
    pub extractions: Vec<Extraction>,
    pub invocations: Vec<Invocation>,
}

impl ScriptAnalysis {
    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty() && self.extractions.is_empty() && self.invocations.is_empty()
    }

    pub fn test_files(&self) -> impl Iterator<Item = &str> {
        self.invocations.iter().filter_map(|inv| match &inv.kind {
            InvocationKind::TestFile { file } => Some(file.as_str()),
            _ => None,
        })
    }

    pub fn unbounded_fetches(&self) -> impl Iterator<Item = &FetchSpec> {
        self.fetches.iter().filter(|f| !f.is_bounded())
    }
}

/// Analyze a script, recognizing [`DEFAULT_DRIVERS`].
pub fn analyze_script(script: &str) -> ScriptAnalysis {
    analyze_script_with(script, DEFAULT_DRIVERS)
}

/// Analyze a script, recognizing the given driver program names.
pub fn analyze_script_with(script: &str, drivers: &[&str]) -> ScriptAnalysis {
    let mut analysis = ScriptAnalysis::default();

    for (line, text) in logical_lines(script) {
        let words = split_words(&text);
        for command in words.split(|w| matches!(w.as_str(), "&&" | "||" | ";" | "|")) {
            let Some(program) = command.first() else {
                continue;
            };
            let args = &command[1..];
            match basename(program) {
                "curl" => analysis.fetches.extend(parse_curl(args, line)),
                "wget" => analysis.fetches.extend(parse_wget(args, line)),
                "tar" => analysis.extractions.extend(parse_tar(args, line)),
                "unzip" => analysis.extractions.extend(
                    args.iter()
                        .find(|a| !a.starts_with('-'))
                        .map(|archive| Extraction { archive: archive.clone(), line }),
                ),
                name => analysis.invocations.extend(parse_invocation(name, args, drivers, line)),
            }
        }
    }
    analysis
}

// Joins backslash continuations and drops comment lines. Yields 1-based line numbers.
fn logical_lines(script: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in script.lines().enumerate() {
        let trimmed = raw.trim();
        let (start, mut text) = pending.take().unwrap_or((index + 1, String::new()));
        if text.is_empty() && (trimmed.is_empty() || trimmed.starts_with('#')) {
            continue;
        }
        match trimmed.strip_suffix('\\') {
            Some(head) => {
                text.push_str(head);
                text.push(' ');
                pending = Some((start, text));
            }
            None => {
                text.push_str(trimmed);
                lines.push((start, text));
            }
        }
    }
    if let Some(rest) = pending {
        lines.push(rest);
    }
    lines
}

/// Split a shell command into words, honoring quotes and trailing comments.
///
/// Variable expansion is not performed; `$VAR` stays as written.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        _ => current.push(q),
                    }
                }
            }
            '#' if !in_word => break,
            ';' => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
                words.push(";".to_string());
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn basename(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

/// Split `--flag=value` into its parts.
fn split_flag(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
        _ => (arg, None),
    }
}

fn scheme_of(url: &str) -> Option<String> {
    url.split_once("://").map(|(scheme, _)| scheme.to_lowercase())
}

// curl options that consume the following word.
const CURL_VALUE_FLAGS: &[&str] = &[
    "-u", "--user", "-H", "--header", "-A", "--user-agent", "-e", "--referer", "-x", "--proxy",
    "-d", "--data", "-X", "--request", "--retry-delay", "--retry-max-time", "-C",
    "--continue-at", "-b", "--cookie", "-c", "--cookie-jar", "-w", "--write-out", "-T",
    "--upload-file", "-r", "--range", "--cacert", "--cert", "--key",
];

fn parse_curl(args: &[String], line: usize) -> Vec<FetchSpec> {
    let mut urls = Vec::new();
    let mut connect_timeout = None;
    let mut max_time = None;
    let mut retries = None;
    let mut output = None;
    let mut remote_name = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = split_flag(arg);
        let mut value = || inline.map(str::to_string).or_else(|| iter.next().cloned());
        match flag {
            "--connect-timeout" => connect_timeout = value().and_then(|v| parse_secs(&v)),
            "-m" | "--max-time" => max_time = value().and_then(|v| parse_secs(&v)),
            "--retry" => retries = value().and_then(|v| v.parse().ok()),
            "-o" | "--output" => output = value(),
            "-O" | "--remote-name" => remote_name = true,
            "--url" => urls.extend(value()),
            f if CURL_VALUE_FLAGS.contains(&f) => {
                value();
            }
            f if f.starts_with('-') => {}
            _ if arg.contains("://") => urls.push(arg.clone()),
            _ => {}
        }
    }

    urls.into_iter()
        .filter_map(|url| {
            let scheme = scheme_of(&url)?;
            let output = output.clone().or_else(|| {
                remote_name
                    .then(|| url.rsplit('/').next().map(str::to_string))
                    .flatten()
            });
            Some(FetchSpec {
                tool: FetchTool::Curl,
                url,
                scheme,
                connect_timeout,
                max_time,
                retries,
                output,
                line,
            })
        })
        .collect()
}

const WGET_VALUE_FLAGS: &[&str] = &[
    "-P", "--directory-prefix", "-U", "--user-agent", "--user", "--password", "--header", "-e",
    "-a", "-o", "--output-file",
];

fn parse_wget(args: &[String], line: usize) -> Vec<FetchSpec> {
    let mut urls = Vec::new();
    let mut connect_timeout = None;
    let mut read_timeout = None;
    let mut retries = None;
    let mut output = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = split_flag(arg);
        let mut value = || inline.map(str::to_string).or_else(|| iter.next().cloned());
        match flag {
            "-T" | "--timeout" => {
                let secs = value().and_then(|v| parse_secs(&v));
                connect_timeout = connect_timeout.or(secs);
                read_timeout = read_timeout.or(secs);
            }
            "--connect-timeout" => connect_timeout = value().and_then(|v| parse_secs(&v)),
            "--read-timeout" => read_timeout = value().and_then(|v| parse_secs(&v)),
            "-t" | "--tries" => {
                // wget counts the first attempt; 0 and inf mean unlimited
                retries = value()
                    .and_then(|v| v.parse::<u32>().ok())
                    .filter(|&tries| tries > 0)
                    .map(|tries| tries - 1);
            }
            "-O" | "--output-document" => output = value(),
            f if WGET_VALUE_FLAGS.contains(&f) => {
                value();
            }
            f if f.starts_with('-') => {}
            _ if arg.contains("://") => urls.push(arg.clone()),
            _ => {}
        }
    }

    urls.into_iter()
        .filter_map(|url| {
            let scheme = scheme_of(&url)?;
            let output = output
                .clone()
                .or_else(|| url.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string));
            Some(FetchSpec {
                tool: FetchTool::Wget,
                url,
                scheme,
                connect_timeout,
                max_time: read_timeout,
                retries,
                output,
                line,
            })
        })
        .collect()
}

fn parse_secs(value: &str) -> Option<u64> {
    value.parse::<f64>().ok().filter(|s| *s >= 0.0).map(|s| s.ceil() as u64)
}

fn parse_tar(args: &[String], line: usize) -> Option<Extraction> {
    let mut extract = false;
    let mut archive = None;

    let mut iter = args.iter().enumerate();
    while let Some((position, arg)) = iter.next() {
        let (flag, inline) = split_flag(arg);
        match flag {
            "--extract" | "--get" => extract = true,
            "--file" => archive = inline.map(str::to_string).or_else(|| iter.next().map(|(_, a)| a.clone())),
            f if f.starts_with("--") => {}
            // clustered short options: -xvf, -zxvf, or the old style xvf as the first word
            f if f.starts_with('-') || position == 0 => {
                let cluster = f.trim_start_matches('-');
                if cluster.contains('x') {
                    extract = true;
                }
                if cluster.ends_with('f') {
                    archive = iter.next().map(|(_, a)| a.clone());
                }
            }
            _ => {}
        }
    }

    extract
        .then_some(archive)
        .flatten()
        .map(|archive| Extraction { archive, line })
}

fn parse_invocation(program: &str, args: &[String], drivers: &[&str], line: usize) -> Option<Invocation> {
    let (program, args) = if program.starts_with("python") {
        match args {
            [flag, module, rest @ ..] if flag == "-m" && module == "unittest" => {
                let discover = rest.first().map(|a| a == "discover").unwrap_or(true);
                return discover.then(|| Invocation {
                    program: "unittest".to_string(),
                    kind: InvocationKind::UnitTests,
                    line,
                });
            }
            [script, rest @ ..] => (basename(script), rest),
            [] => return None,
        }
    } else {
        (program, args)
    };

    if !drivers.contains(&program) {
        return None;
    }

    let kind = if args.iter().any(|a| a == "--version") {
        InvocationKind::Version
    } else if let Some(file) = test_file_arg(args) {
        InvocationKind::TestFile { file }
    } else {
        InvocationKind::Other { args: args.to_vec() }
    };
    Some(Invocation {
        program: program.to_string(),
        kind,
        line,
    })
}

fn test_file_arg(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = split_flag(arg);
        if matches!(flag, "-f" | "--input-file" | "--config-file") {
            return inline.map(str::to_string).or_else(|| iter.next().cloned());
        }
        if let Some(rest) = arg.strip_prefix("-f").filter(|r| !r.is_empty()) {
            return Some(rest.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH: &str = r#"
echo "${PWD}"
cd ../
# allow 20 min for transfer before timeout
curl --verbose --ipv4 --connect-timeout 8 --max-time 1200 --retry 128 --ftp-ssl --ftp-pasv -u "anonymous:anonymous" ftp://ftp.example.org/obs/convective_obs_data.tar --output convective_obs_data.tar
tar -xvf convective_obs_data.tar
rm -f *.tar
"#;

    #[test]
    fn test_curl_fetch_is_bounded() {
        let analysis = analyze_script(FETCH);
        assert_eq!(analysis.fetches.len(), 1);
        let fetch = &analysis.fetches[0];
        assert_eq!(fetch.tool, FetchTool::Curl);
        assert_eq!(fetch.scheme, "ftp");
        assert_eq!(fetch.url, "ftp://ftp.example.org/obs/convective_obs_data.tar");
        assert_eq!(fetch.connect_timeout, Some(8));
        assert_eq!(fetch.max_time, Some(1200));
        assert_eq!(fetch.retries, Some(128));
        assert_eq!(fetch.output.as_deref(), Some("convective_obs_data.tar"));
        assert_eq!(fetch.line, 5);
        assert!(fetch.is_bounded());
        assert_eq!(fetch.worst_case_secs(), Some(1200 * 129));
    }

    #[test]
    fn test_user_credentials_are_not_mistaken_for_url() {
        let analysis = analyze_script("curl -u ftp://user:pw -O https://example.org/a/b.tar.gz");
        assert_eq!(analysis.fetches.len(), 1);
        assert_eq!(analysis.fetches[0].url, "https://example.org/a/b.tar.gz");
        assert_eq!(analysis.fetches[0].output.as_deref(), Some("b.tar.gz"));
        assert!(!analysis.fetches[0].is_bounded());
    }

    #[test]
    fn test_wget_tries_and_timeout() {
        let analysis = analyze_script("wget --timeout=30 --tries=3 https://example.org/data.tar");
        let fetch = &analysis.fetches[0];
        assert_eq!(fetch.tool, FetchTool::Wget);
        assert_eq!(fetch.connect_timeout, Some(30));
        assert_eq!(fetch.max_time, Some(30));
        assert_eq!(fetch.retries, Some(2));
        assert_eq!(fetch.output.as_deref(), Some("data.tar"));
        assert!(fetch.is_bounded());

        let unlimited = analyze_script("wget -t 0 -T 5 https://example.org/data.tar");
        assert_eq!(unlimited.fetches[0].retries, None);
    }

    #[test]
    fn test_tar_extractions() {
        let analysis = analyze_script(
            "tar -xvf a.tar\ntar -zxvf b.tar.gz\ntar xf c.tar\ntar --extract --file=d.tar\ntar -cvf out.tar dir\nunzip -q e.zip",
        );
        let archives: Vec<&str> = analysis.extractions.iter().map(|e| e.archive.as_str()).collect();
        assert_eq!(archives, vec!["a.tar", "b.tar.gz", "c.tar", "d.tar", "e.zip"]);
    }

    #[test]
    fn test_driver_invocations() {
        let analysis = analyze_script(
            "micromamba activate _MDTF_base\n./mdtf_framework.py --version\n./mdtf -f tests/set1.jsonc\npython -m unittest discover\npython ./mdtf_framework.py --input-file=x.jsonc",
        );
        let kinds: Vec<&InvocationKind> = analysis.invocations.iter().map(|i| &i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &InvocationKind::Version,
                &InvocationKind::TestFile { file: "tests/set1.jsonc".to_string() },
                &InvocationKind::UnitTests,
                &InvocationKind::TestFile { file: "x.jsonc".to_string() },
            ]
        );
        assert_eq!(analysis.test_files().collect::<Vec<_>>(), vec!["tests/set1.jsonc", "x.jsonc"]);
        assert_eq!(analysis.invocations[1].line, 3);
    }

    #[test]
    fn test_continuations_and_command_lists() {
        let analysis = analyze_script("cd data && curl --connect-timeout 5 \\\n  --max-time 60 --retry 2 \\\n  https://example.org/x.tar -o x.tar && tar -xf x.tar");
        assert_eq!(analysis.fetches.len(), 1);
        assert!(analysis.fetches[0].is_bounded());
        assert_eq!(analysis.fetches[0].line, 1);
        assert_eq!(analysis.extractions[0].archive, "x.tar");
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r#"echo "a b" 'c d' e\ # trailing"#),
            vec!["echo", "a b", "c d", "e\\"]
        );
        assert_eq!(split_words("a;b"), vec!["a", ";", "b"]);
    }
}
