//! Archive extraction.

use super::{param, run_single};
use crate::context::ExecutionContext;
use crate::registry::OpResult;
use crate::tool_traits::ToolArgs;

/// `tar xf <archive> -C <dir> --strip-components=1`
#[derive(Debug, Clone)]
pub struct TarExtractArgs {
    pub archive: String,
    pub dir: String,
}

impl ToolArgs for TarExtractArgs {
    fn program(&self) -> &str {
        "tar"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "xf".to_string(),
            self.archive.clone(),
            "-C".to_string(),
            self.dir.clone(),
            "--strip-components=1".to_string(),
        ]
    }
}

/// `unzip -n <archive> -d <dir>`; existing files are kept
#[derive(Debug, Clone)]
pub struct UnzipArgs {
    pub archive: String,
    pub dir: String,
}

impl ToolArgs for UnzipArgs {
    fn program(&self) -> &str {
        "unzip"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-n".to_string(),
            self.archive.clone(),
            "-d".to_string(),
            self.dir.clone(),
        ]
    }
}

/// `Untar <archive> <dir>`: extract, dropping the top-level directory
pub fn untar(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&TarExtractArgs {
        archive: param(params, 0, "archive")?.to_string(),
        dir: param(params, 1, "dir")?.to_string(),
    })
}

/// `UnzipFile <archive> <dir>`
pub fn unzip_file(_ctx: &ExecutionContext, params: &[String]) -> OpResult {
    run_single(&UnzipArgs {
        archive: param(params, 0, "archive")?.to_string(),
        dir: param(params, 1, "dir")?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataBundle;
    use crate::tool_runner::run_tool;
    use crate::tool_traits::Invocation;
    use std::fs;

    #[test]
    fn test_untar_strips_top_level_directory() {
        let work = tempfile::tempdir().expect("tempdir");
        let src = work.path().join("pkg-1.0");
        fs::create_dir(&src).expect("mkdir");
        fs::write(src.join("README"), "hello").expect("write");

        let archive = work.path().join("pkg.tar");
        let packed = run_tool(
            &Invocation::new("tar")
                .arg("cf")
                .arg(archive.display().to_string())
                .arg("-C")
                .arg(work.path().display().to_string())
                .arg("pkg-1.0"),
        )
        .expect("tar cf");
        assert!(packed.success);

        let dest = work.path().join("out");
        fs::create_dir(&dest).expect("mkdir");
        let ctx = ExecutionContext::new("ana", 1000, 1000, "/home/ana", "Test OS", DataBundle::empty());
        untar(
            &ctx,
            &[archive.display().to_string(), dest.display().to_string()],
        )
        .expect("untar");

        assert_eq!(fs::read_to_string(dest.join("README")).expect("read"), "hello");
    }

    #[test]
    fn test_unzip_args_never_overwrite() {
        let args = UnzipArgs {
            archive: "/tmp/fonts.zip".into(),
            dir: "/usr/share/fonts/extra".into(),
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["-n", "/tmp/fonts.zip", "-d", "/usr/share/fonts/extra"]
        );
    }
}
