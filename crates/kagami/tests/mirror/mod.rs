use kagami::{decrypt::derive_iv, HttpClient, MemorySink, Mirror};
use wiremock::MockServer;

use crate::{encrypt, media_playlist, HlsMock};

const KEY: [u8; 16] = *b"0123456789abcdef";

#[tokio::test]
async fn test_mirror_master_playlist() -> anyhow::Result<()> {
    let output = tempfile::tempdir()?;
    let server = MockServer::start().await;
    server
        .mock("/live/master.m3u8", include_str!("../fixtures/hls/master.m3u8"))
        .await
        .mock(
            "/live/720p/index.m3u8",
            media_playlist(&["seg0.ts", "seg1.ts", "seg2.ts"]),
        )
        .await
        .mock(
            "/live/360p/index.m3u8",
            media_playlist(&["seg0.ts", "seg1.ts", "seg2.ts"]),
        )
        .await;
    for rendition in ["720p", "360p"] {
        for index in 0..3 {
            server
                .mock_counted(
                    &format!("/live/{rendition}/seg{index}.ts"),
                    format!("{rendition} {index}").into_bytes(),
                    1,
                )
                .await;
        }
    }

    let report = Mirror::new(HttpClient::default(), output.path())
        .run(server.url("/live/master.m3u8"))
        .await?;
    assert_eq!(report.resources.len(), 9);
    assert_eq!(report.materialized.operations, 9);

    let master = std::fs::read_to_string(output.path().join("master.m3u8"))?;
    assert!(master.contains("\nmanifest0/index.m3u8\n"));
    assert!(!master.contains(&server.uri()));

    for (manifest, rendition) in [("manifest0", "720p"), ("manifest1", "360p")] {
        let dir = output.path().join(manifest);
        let playlist = std::fs::read_to_string(dir.join("index.m3u8"))?;
        assert!(playlist.contains("\nseg2.ts\n"));
        for index in 0..3 {
            let segment = std::fs::read_to_string(dir.join(format!("seg{index}.ts")))?;
            assert_eq!(segment, format!("{rendition} {index}"));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_mirror_decrypted() -> anyhow::Result<()> {
    let output = tempfile::tempdir()?;
    let server = MockServer::start().await;
    server
        .mock(
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nenc/index.m3u8\n",
        )
        .await
        .mock("/enc/index.m3u8", include_str!("../fixtures/hls/encrypted.m3u8"))
        .await
        .mock_bytes("/keys/key.bin", KEY.to_vec())
        .await
        .mock_bytes("/enc/seg0.ts", encrypt(&KEY, &derive_iv(0, 0), b"first"))
        .await
        .mock_bytes("/enc/seg1.ts", encrypt(&KEY, &derive_iv(0, 1), b"second"))
        .await;

    Mirror::new(HttpClient::default(), output.path())
        .decrypt(true)
        .run(server.url("/master.m3u8"))
        .await?;

    let dir = output.path().join("manifest0");
    assert_eq!(std::fs::read(dir.join("seg0.ts"))?, b"first");
    assert_eq!(std::fs::read(dir.join("seg1.ts"))?, b"second");

    let playlist = std::fs::read_to_string(dir.join("index.m3u8"))?;
    assert!(!playlist.contains("#EXT-X-KEY"));
    assert!(!output.path().join("key.bin").exists());
    assert!(!dir.join("key.bin").exists());
    Ok(())
}

#[tokio::test]
async fn test_mirror_key_verbatim() -> anyhow::Result<()> {
    let output = tempfile::tempdir()?;
    let server = MockServer::start().await;
    let encrypted = encrypt(&KEY, &derive_iv(0, 0), b"first");
    server
        .mock(
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nenc/index.m3u8\n",
        )
        .await
        .mock("/enc/index.m3u8", include_str!("../fixtures/hls/encrypted.m3u8"))
        .await
        .mock_bytes("/keys/key.bin", KEY.to_vec())
        .await
        .mock_bytes("/enc/seg0.ts", encrypted.clone())
        .await
        .mock_bytes("/enc/seg1.ts", encrypted.clone())
        .await;

    Mirror::new(HttpClient::default(), output.path())
        .run(server.url("/master.m3u8"))
        .await?;

    assert_eq!(std::fs::read(output.path().join("key.bin"))?, KEY);

    let dir = output.path().join("manifest0");
    assert_eq!(std::fs::read(dir.join("seg0.ts"))?, encrypted);
    let playlist = std::fs::read_to_string(dir.join("index.m3u8"))?;
    assert!(playlist.contains("URI=\"../key.bin\""));
    Ok(())
}

#[tokio::test]
async fn test_mirror_dash_sidx() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/vod/manifest.mpd", include_str!("../fixtures/dash/sidx.mpd"))
        .await
        .mock_counted("/vod/media/video.mp4", b"video".to_vec(), 1)
        .await
        .mock_counted("/vod/media/audio.mp4", b"audio".to_vec(), 1)
        .await;

    let sink = MemorySink::new();
    let report = Mirror::new(HttpClient::default(), "/out")
        .run_with_sink(server.url("/vod/manifest.mpd"), sink.clone())
        .await?;

    // one extra segment for each segment index
    let segments = report
        .resources
        .iter()
        .filter(|r| r.as_segment().is_some())
        .count();
    assert_eq!(segments, 4);
    assert_eq!(
        sink.paths(),
        vec![
            std::path::PathBuf::from("/out/master.m3u8"),
            "/out/media/audio.mp4".into(),
            "/out/media/video.mp4".into(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_mirror_dash_plays_locally() -> anyhow::Result<()> {
    let output = tempfile::tempdir()?;
    let server = MockServer::start().await;
    let mpd = include_str!("../fixtures/dash/template.mpd");
    server
        .mock("/manifest.mpd", mpd)
        .await
        .mock_bytes("/720p/init.mp4", b"init".to_vec())
        .await
        .mock_bytes("/720p/seg-001.m4s", b"seg 1".to_vec())
        .await
        .mock_bytes("/720p/seg-002.m4s", b"seg 2".to_vec())
        .await;

    Mirror::new(HttpClient::default(), output.path())
        .run(server.url("/manifest.mpd"))
        .await?;

    // the MPD is kept as is, and its templates resolve against the output directory
    let written = std::fs::read_to_string(output.path().join("master.m3u8"))?;
    assert_eq!(written, mpd);
    assert!(written.contains("media=\"$RepresentationID$/seg-$Number%03d$.m4s\""));
    let dir = output.path().join("720p");
    assert_eq!(std::fs::read(dir.join("init.mp4"))?, b"init");
    assert_eq!(std::fs::read(dir.join("seg-001.m4s"))?, b"seg 1");
    assert_eq!(std::fs::read(dir.join("seg-002.m4s"))?, b"seg 2");
    Ok(())
}

#[tokio::test]
async fn test_mirror_decrypts_init_segment() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let mut iv = [0; 16];
    iv[15] = 1;
    server
        .mock(
            "/fmp4/index.m3u8",
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n\
             #EXT-X-KEY:METHOD=AES-128,URI=\"k.bin\",IV=0x00000000000000000000000000000001\n\
             #EXT-X-MAP:URI=\"init.mp4\"\n\
             #EXTINF:4,\ns0.m4s\n#EXT-X-ENDLIST\n",
        )
        .await
        .mock_bytes("/fmp4/k.bin", KEY.to_vec())
        .await
        .mock_bytes("/fmp4/init.mp4", encrypt(&KEY, &iv, b"ftyp moov"))
        .await
        .mock_bytes("/fmp4/s0.m4s", encrypt(&KEY, &iv, b"moof mdat"))
        .await;

    let sink = MemorySink::new();
    Mirror::new(HttpClient::default(), "/out")
        .decrypt(true)
        .run_with_sink(server.url("/fmp4/index.m3u8"), sink.clone())
        .await?;

    assert_eq!(sink.get("/out/init.mp4"), Some(b"ftyp moov".to_vec()));
    assert_eq!(sink.get("/out/s0.m4s"), Some(b"moof mdat".to_vec()));
    let playlist = String::from_utf8(sink.get("/out/master.m3u8").unwrap_or_default())?;
    assert!(!playlist.contains("#EXT-X-KEY"));
    Ok(())
}

#[tokio::test]
async fn test_mirror_failure_names_uri() -> anyhow::Result<()> {
    let output = tempfile::tempdir()?;
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", media_playlist(&["ok.ts", "missing.ts"]))
        .await
        .mock_bytes("/ok.ts", b"ok".to_vec())
        .await;

    let error = Mirror::new(HttpClient::default(), output.path())
        .run(server.url("/index.m3u8"))
        .await
        .unwrap_err();

    let missing = server.url("/missing.ts");
    assert_eq!(error.uri(), Some(missing.as_str()));
    assert_eq!(
        error.to_string(),
        format!("HTTP error: 404 Not Found|{missing}")
    );
    Ok(())
}
