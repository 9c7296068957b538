// the providers hide their player config behind the dean edwards packer, these turn the packed
// script back into the source it would have eval'd
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use crate::server::error::{AppResult, Error};

/// what every packed script starts its bootstrap with
pub const PACKED_SIGNATURE: &str = "eval(function(p,a,c,k,e,d)";

pub type DynScriptEvaluator = Arc<dyn ScriptEvaluatorTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait ScriptEvaluatorTrait {
    /// full text of a script block in, whatever it would have run out
    async fn evaluate(&self, script: &str) -> AppResult<String>;
}

static PACKER_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\}\s*\(\s*'(?P<payload>.*)'\s*,\s*(?P<radix>\d+|\[\])\s*,\s*(?P<count>\d+)\s*,\s*'(?P<words>.*?)'\s*\.split\(\s*['"]\|['"]\s*\)"#,
    )
    .expect("packer regex is valid")
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("word regex is valid"));

const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn digit_value(c: char) -> Option<u32> {
    match c {
        '0'..='9' => Some(c as u32 - '0' as u32),
        'a'..='z' => Some(c as u32 - 'a' as u32 + 10),
        'A'..='Z' => Some(c as u32 - 'A' as u32 + 36),
        _ => None,
    }
}

fn encode_word(mut index: usize, radix: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(ALPHABET[index % radix]);
        index /= radix;
        if index == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// index of a packed token, only if the packer could have produced exactly this spelling
fn decode_word(word: &str, radix: usize) -> Option<usize> {
    let mut value: usize = 0;
    for c in word.chars() {
        let digit = digit_value(c)? as usize;
        if digit >= radix {
            return None;
        }
        value = value.checked_mul(radix)?.checked_add(digit)?;
    }
    // leading zeros never come out of the encoder, "01" is a literal not token 1
    (encode_word(value, radix) == word).then_some(value)
}

/// pure rust unpacker, no runtime involved
pub fn unpack(script: &str) -> AppResult<String> {
    let caps = PACKER_CALL
        .captures(script)
        .ok_or_else(|| Error::EvaluationFailed("no packer call found in script".to_string()))?;

    let payload = &caps["payload"];
    let radix = match &caps["radix"] {
        "[]" => 62,
        r => r
            .parse::<usize>()
            .map_err(|e| Error::EvaluationFailed(format!("bad packer radix {}: {}", r, e)))?,
    };
    if !(2..=62).contains(&radix) {
        return Err(Error::EvaluationFailed(format!(
            "unsupported packer radix {}",
            radix
        )));
    }

    let count: usize = caps["count"]
        .parse()
        .map_err(|e| Error::EvaluationFailed(format!("bad packer word count: {}", e)))?;
    let words: Vec<&str> = caps["words"].split('|').collect();
    if words.len() != count {
        debug!(
            "packer declares {} words but carries {}, unpacking anyway",
            count,
            words.len()
        );
    }

    let unpacked = WORD.replace_all(payload, |c: &Captures| {
        let token = &c[0];
        decode_word(token, radix)
            .and_then(|i| words.get(i))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_string())
            .unwrap_or_else(|| token.to_string())
    });

    Ok(unpacked.replace("\\'", "'").replace("\\\\", "\\"))
}

#[derive(Default)]
pub struct PackerEvaluator;

impl PackerEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScriptEvaluatorTrait for PackerEvaluator {
    async fn evaluate(&self, script: &str) -> AppResult<String> {
        unpack(script)
    }
}

/// runs the script under node with `eval` swapped for a stdout write, for packers the pure
/// unpacker doesn't understand
pub struct NodeEvaluator {
    binary: String,
    timeout: Duration,
}

impl NodeEvaluator {
    pub fn new(binary: String, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    fn program(script: &str) -> String {
        format!(
            "var eval = function (code) {{ process.stdout.write(String(code)); }};\n{}\n",
            script
        )
    }
}

#[async_trait]
impl ScriptEvaluatorTrait for NodeEvaluator {
    async fn evaluate(&self, script: &str) -> AppResult<String> {
        let mut child = Command::new(&self.binary)
            .arg("--disallow-code-generation-from-strings")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("failed to start {}: {}", self.binary, e);
                Error::EvaluationFailed(format!("failed to start {}: {}", self.binary, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EvaluationFailed("node stdin unavailable".to_string()))?;
        stdin
            .write_all(Self::program(script).as_bytes())
            .await
            .map_err(|e| Error::EvaluationFailed(format!("failed to pipe script: {}", e)))?;
        // closing stdin is what tells node the program is complete
        drop(stdin);

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::EvaluationFailed(format!("script ran longer than {:?}", self.timeout))
            })?
            .map_err(|e| Error::EvaluationFailed(format!("node did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("node exited with {}: {}", output.status, stderr.trim());
            return Err(Error::EvaluationFailed(format!(
                "node exited with {}",
                output.status
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
