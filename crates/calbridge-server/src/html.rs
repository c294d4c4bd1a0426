//! Pages returned to popup windows.

/// Shown after a completed connect; closes its own window.
pub const CONNECTED_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <script>
      window.close();
    </script>
  </head>
  <body>
    <p>Completed connecting to Google Calendar. Please close this window.</p>
  </body>
</html>
"#;

/// Returned to action links; closes its own window.
pub const CLOSE_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <script>
      window.close();
    </script>
  </head>
</html>
"#;
