//! Changed-file extraction from unified git diffs.

use std::collections::BTreeSet;

/// Returns the files named in `diff --git a/<path> b/<path>` and
/// `+++ b/<path>` headers, deduplicated and sorted.
pub fn changed_files(diff: &str) -> Vec<String> {
    let mut files = BTreeSet::new();

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git a/") {
            if let Some((path, _)) = rest.split_once(" b/") {
                files.insert(path.to_string());
            }
        } else if let Some(path) = line.strip_prefix("+++ b/") {
            files.insert(path.trim_end().to_string());
        }
    }

    files.into_iter().filter(|f| !f.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/auth/service.py b/auth/service.py
index 3b18e51..a2c4d1f 100644
--- a/auth/service.py
+++ b/auth/service.py
@@ -1,3 +1,4 @@
+import hmac
 def login():
     pass
diff --git a/old.py b/old.py
deleted file mode 100644
--- a/old.py
+++ /dev/null
@@ -1 +0,0 @@
-x = 1
";

    #[test]
    fn test_changed_files() {
        assert_eq!(changed_files(DIFF), vec!["auth/service.py", "old.py"]);
    }

    #[test]
    fn test_renamed_file_keeps_both_sides() {
        let diff = "diff --git a/utils.py b/helpers.py\n--- a/utils.py\n+++ b/helpers.py\n";
        assert_eq!(changed_files(diff), vec!["helpers.py", "utils.py"]);
    }

    #[test]
    fn test_empty_diff() {
        assert!(changed_files("").is_empty());
        assert!(changed_files("just some text\n").is_empty());
    }
}
