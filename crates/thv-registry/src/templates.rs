//! Dockerfile synthesis for protocol-scheme identifiers.
//!
//! `uvx://pkg`, `npx://pkg`, `go://module`, `maven://coords` and
//! `gradle://coords` each map to a templated base image that installs the
//! package and runs it as the container entrypoint.

const SCHEMES: &[&str] = &["uvx", "npx", "go", "maven", "gradle"];

/// Split `scheme://package`, returning `None` for unknown or missing schemes.
pub fn parse_scheme(identifier: &str) -> Option<(&str, &str)> {
    let (scheme, package) = identifier.split_once("://")?;
    if SCHEMES.contains(&scheme) && !package.is_empty() {
        Some((scheme, package))
    } else {
        None
    }
}

/// Local tag for a scheme-built image.
pub fn build_tag(scheme: &str, package: &str) -> String {
    let sanitized: String = package
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("toolhive/{scheme}-{}:latest", sanitized.trim_matches('-'))
}

/// Dockerfile body for a scheme, or `None` when the scheme is unknown.
pub fn dockerfile_for(scheme: &str, package: &str) -> Option<String> {
    let dockerfile = match scheme {
        "uvx" => format!(
            "FROM python:3.12-slim\n\
             RUN pip install --no-cache-dir uv\n\
             ENTRYPOINT [\"uvx\", \"{package}\"]\n"
        ),
        "npx" => format!(
            "FROM node:22-slim\n\
             ENTRYPOINT [\"npx\", \"--yes\", \"{package}\"]\n"
        ),
        "go" => format!(
            "FROM golang:1.23-alpine AS build\n\
             RUN go install {package}\n\
             FROM alpine:3.20\n\
             COPY --from=build /go/bin/ /usr/local/bin/\n\
             ENTRYPOINT [\"/bin/sh\", \"-c\", \"exec $(ls /usr/local/bin | head -n1)\"]\n"
        ),
        "maven" => format!(
            "FROM maven:3.9-eclipse-temurin-21 AS build\n\
             RUN mvn -q dependency:copy -Dartifact={package} -DoutputDirectory=/app\n\
             FROM eclipse-temurin:21-jre\n\
             COPY --from=build /app /app\n\
             ENTRYPOINT [\"/bin/sh\", \"-c\", \"exec java -jar /app/*.jar\"]\n"
        ),
        "gradle" => format!(
            "FROM gradle:8-jdk21 AS build\n\
             RUN gradle -q dependencies --configuration runtimeClasspath || true\n\
             RUN gradle -q fetchArtifact -Partifact={package} -PoutputDir=/app\n\
             FROM eclipse-temurin:21-jre\n\
             COPY --from=build /app /app\n\
             ENTRYPOINT [\"/bin/sh\", \"-c\", \"exec java -jar /app/*.jar\"]\n"
        ),
        _ => return None,
    };
    Some(dockerfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_known() {
        assert_eq!(
            parse_scheme("uvx://mcp-server-fetch@2.0"),
            Some(("uvx", "mcp-server-fetch@2.0"))
        );
        assert_eq!(parse_scheme("npx://@scope/tool"), Some(("npx", "@scope/tool")));
        assert_eq!(parse_scheme("go://github.com/x/y@latest"), Some(("go", "github.com/x/y@latest")));
    }

    #[test]
    fn test_parse_scheme_rejects_unknown_and_plain() {
        assert_eq!(parse_scheme("docker://image"), None);
        assert_eq!(parse_scheme("ghcr.io/example/fetch:2"), None);
        assert_eq!(parse_scheme("uvx://"), None);
    }

    #[test]
    fn test_build_tag_sanitizes() {
        assert_eq!(
            build_tag("npx", "@scope/Tool@1.2"),
            "toolhive/npx-scope-tool-1-2:latest"
        );
    }

    #[test]
    fn test_dockerfiles_reference_package() {
        for scheme in SCHEMES {
            let dockerfile = dockerfile_for(scheme, "pkg-under-test").unwrap();
            assert!(dockerfile.starts_with("FROM "), "{scheme} must have a base");
            assert!(
                dockerfile.contains("pkg-under-test"),
                "{scheme} must install the package"
            );
        }
        assert!(dockerfile_for("docker", "x").is_none());
    }
}
